//! Identity types for REM entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;
use uuid::Uuid;

/// Timestamp alias used across the platform.
pub type Timestamp = DateTime<Utc>;

/// Namespace for all deterministic (v5) identifiers.
///
/// Seeding, moment building, and user creation all derive row identity from
/// this namespace so that independent processes agree on ids without
/// coordination.
pub const REM_NAMESPACE: Uuid = Uuid::from_u128(0x9f2c_1b7a_4d3e_4a60_8c15_6e0d_2f84_b913);

// ============================================================================
// ENTITY ID TYPE SYSTEM
// ============================================================================

/// Trait for type-safe entity IDs.
///
/// Each entity type gets its own newtype so ids cannot be mixed up at call
/// sites. The trait also carries the deterministic-id constructor used by
/// idempotent writers.
pub trait EntityIdType:
    Copy
    + Clone
    + Eq
    + PartialEq
    + Hash
    + fmt::Debug
    + fmt::Display
    + FromStr
    + Serialize
    + serde::de::DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// The table name of the entity type (e.g. "sessions").
    const ENTITY_NAME: &'static str;

    /// Create an ID from a UUID.
    fn new(uuid: Uuid) -> Self;

    /// Get the underlying UUID.
    fn as_uuid(&self) -> Uuid;

    /// Create a nil (all zeros) ID.
    fn nil() -> Self {
        Self::new(Uuid::nil())
    }

    /// Create a new timestamp-sortable UUIDv7 ID.
    fn now_v7() -> Self {
        Self::new(Uuid::now_v7())
    }

    /// Create a new random UUIDv4 ID.
    fn new_v4() -> Self {
        Self::new(Uuid::new_v4())
    }

    /// Deterministic v5 ID from a business key.
    ///
    /// The name is `<table>:<key>:<user_id-or-empty>`; equal inputs always
    /// produce the same row identity, which is what makes seeding and moment
    /// building idempotent.
    fn deterministic(key: &str, user_id: Option<Uuid>) -> Self {
        let scope = user_id.map(|u| u.to_string()).unwrap_or_default();
        let name = format!("{}:{}:{}", Self::ENTITY_NAME, key, scope);
        Self::new(Uuid::new_v5(&REM_NAMESPACE, name.as_bytes()))
    }
}

/// Error type for parsing entity IDs from strings.
#[derive(Debug, Clone)]
pub struct EntityIdParseError {
    pub entity_name: &'static str,
    pub input: String,
    pub source: uuid::Error,
}

impl fmt::Display for EntityIdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Failed to parse {} ID from '{}': {}",
            self.entity_name, self.input, self.source
        )
    }
}

impl std::error::Error for EntityIdParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Macro to define a type-safe entity ID newtype.
macro_rules! define_entity_id {
    ($name:ident, $entity:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Uuid);

        impl EntityIdType for $name {
            const ENTITY_NAME: &'static str = $entity;

            fn new(uuid: Uuid) -> Self {
                Self(uuid)
            }

            fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = EntityIdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|source| EntityIdParseError {
                        entity_name: $entity,
                        input: s.to_string(),
                        source,
                    })
            }
        }

        impl Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                self.0.serialize(serializer)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                Uuid::deserialize(deserializer).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Uuid {
                id.0
            }
        }
    };
}

define_entity_id!(UserId, "users", "Identifier for a user (owner entity).");
define_entity_id!(SessionId, "sessions", "Identifier for a conversation session.");
define_entity_id!(MessageId, "messages", "Identifier for an individual turn part.");
define_entity_id!(MomentId, "moments", "Identifier for a temporal moment record.");
define_entity_id!(ResourceId, "resources", "Identifier for an ordered document chunk.");
define_entity_id!(FileId, "files", "Identifier for a raw upload.");
define_entity_id!(SchemaId, "schemas", "Identifier for an ontology-registry row.");
define_entity_id!(OntologyId, "ontologies", "Identifier for a wiki-style entity.");
define_entity_id!(ToolId, "tools", "Identifier for a remote tool registration.");
define_entity_id!(ServerId, "servers", "Identifier for a remote tool server.");
define_entity_id!(TaskId, "task_queue", "Identifier for a queued background task.");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_ids_are_stable() {
        let a = UserId::deterministic("alice@example.com", None);
        let b = UserId::deterministic("alice@example.com", None);
        assert_eq!(a, b);
    }

    #[test]
    fn deterministic_ids_scope_by_user() {
        let owner = Uuid::new_v4();
        let a = MomentId::deterministic("session-abc-20250101-chunk-0", Some(owner));
        let b = MomentId::deterministic("session-abc-20250101-chunk-0", None);
        assert_ne!(a, b);
    }

    #[test]
    fn entity_names_differ_per_type() {
        let a = UserId::deterministic("same-key", None);
        let b = SessionId::deterministic("same-key", None);
        assert_ne!(a.as_uuid(), b.as_uuid());
    }

    #[test]
    fn id_round_trips_through_string() {
        let id = SessionId::now_v7();
        let parsed: SessionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
