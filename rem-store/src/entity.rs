//! Typed entity store
//!
//! Upsert/get/find/soft-delete over any registered table. The store applies
//! the tenant's mode policy on write (encrypt designated fields, stamp
//! `encryption_level`) and the per-row level policy on read (decrypt what the
//! server may decrypt, leave ciphertext otherwise).

use crate::{Db, SchemaRegistry};
use rem_core::{EncryptionLevel, EntityRecord, StoreError, TableSpec};
use rem_crypto::{EncryptionService, FieldValue};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use uuid::Uuid;

/// Fields encoded deterministically so equality search keeps working.
const DETERMINISTIC_FIELDS: [&str; 1] = ["email"];

/// Per-write options.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Chat-path writes cap sealed tenants to platform so history stays
    /// readable by the server.
    pub chat_path: bool,
}

pub struct EntityStore {
    db: Db,
    registry: Arc<SchemaRegistry>,
    crypto: Arc<EncryptionService>,
}

impl EntityStore {
    pub fn new(db: Db, registry: Arc<SchemaRegistry>, crypto: Arc<EncryptionService>) -> Self {
        Self {
            db,
            registry,
            crypto,
        }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn crypto(&self) -> &Arc<EncryptionService> {
        &self.crypto
    }

    /// Upsert a row, applying the mode policy before write.
    pub async fn upsert(
        &self,
        table: &str,
        mut record: EntityRecord,
        opts: WriteOptions,
    ) -> Result<EntityRecord, StoreError> {
        let spec = self.registry.spec(table).await?;
        record.sys.updated_at = chrono::Utc::now();

        record.sys.encryption_level = self.apply_write_policy(&spec, &mut record, opts).await?;

        let payload = serde_json::to_value(&record).map_err(|e| StoreError::Conversion {
            table: table.to_string(),
            reason: e.to_string(),
        })?;

        let result = self
            .db
            .query_json_opt("SELECT rem_entity_upsert($1, $2)", &[&table, &payload])
            .await?
            .ok_or_else(|| StoreError::Database(format!("upsert into {table} returned no row")))?;

        parse_record(table, result)
    }

    /// Fetch one row by id, decrypting server-decryptable fields.
    pub async fn get(&self, table: &str, id: Uuid) -> Result<Option<EntityRecord>, StoreError> {
        let spec = self.registry.spec(table).await?;
        let json = self
            .db
            .query_json_opt("SELECT rem_entity_get($1, $2)", &[&table, &id])
            .await?;
        match json {
            None => Ok(None),
            Some(value) => {
                let record = parse_record(table, value)?;
                Ok(Some(self.apply_read_policy(&spec, record).await?))
            }
        }
    }

    /// Fetch one row, erroring when absent.
    pub async fn get_required(&self, table: &str, id: Uuid) -> Result<EntityRecord, StoreError> {
        self.get(table, id).await?.ok_or_else(|| StoreError::NotFound {
            table: table.to_string(),
            id,
        })
    }

    /// Equality-filter query. Filter values compare as text against the
    /// row's JSONB projection, so UUIDs and enums filter naturally.
    pub async fn find(
        &self,
        table: &str,
        filters: &Map<String, JsonValue>,
        limit: i32,
    ) -> Result<Vec<EntityRecord>, StoreError> {
        let spec = self.registry.spec(table).await?;
        let filters = JsonValue::Object(filters.clone());
        let rows = self
            .db
            .query_json_array(
                "SELECT rem_entity_find($1, $2, $3)",
                &[&table, &filters, &limit],
            )
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let record = parse_record(table, row)?;
            records.push(self.apply_read_policy(&spec, record).await?);
        }
        Ok(records)
    }

    /// Find a user row by email using the deterministic encoding.
    pub async fn find_user_by_email(
        &self,
        tenant_id: &str,
        email: &str,
    ) -> Result<Option<EntityRecord>, StoreError> {
        let encoded = self
            .crypto
            .encrypt_deterministic(tenant_id, email)
            .await
            .map_err(StoreError::Crypto)?;
        let mut filters = Map::new();
        filters.insert("email".to_string(), JsonValue::String(encoded));
        filters.insert(
            "tenant_id".to_string(),
            JsonValue::String(tenant_id.to_string()),
        );
        Ok(self.find("users", &filters, 1).await?.into_iter().next())
    }

    /// Soft-delete one row. Triggers drop the derived KV entry.
    pub async fn soft_delete(&self, table: &str, id: Uuid) -> Result<bool, StoreError> {
        self.registry.spec(table).await?;
        let row = self
            .db
            .query_opt("SELECT rem_entity_soft_delete($1, $2)", &[&table, &id])
            .await?;
        Ok(row.map(|r| r.get::<_, bool>(0)).unwrap_or(false))
    }

    /// Encrypt designated fields in place and return the level to stamp.
    async fn apply_write_policy(
        &self,
        spec: &TableSpec,
        record: &mut EntityRecord,
        opts: WriteOptions,
    ) -> Result<EncryptionLevel, StoreError> {
        if !spec.is_encrypted {
            return Ok(EncryptionLevel::None);
        }
        let Some(tenant_id) = record.sys.tenant_id.clone() else {
            // Tenantless rows have no DEK to encrypt under.
            return Ok(EncryptionLevel::None);
        };

        let mode = self
            .crypto
            .tenant_mode(&tenant_id)
            .await
            .map_err(StoreError::Crypto)?;
        let level = EncryptionService::effective_level(mode, opts.chat_path);

        if matches!(level, EncryptionLevel::None | EncryptionLevel::Disabled) {
            return Ok(level);
        }

        for field in &spec.encrypted_fields {
            let Some(plain) = record.str_field(field).map(str::to_string) else {
                continue;
            };
            let stored = if DETERMINISTIC_FIELDS.contains(&field.as_str()) {
                self.crypto
                    .encrypt_deterministic(&tenant_id, &plain)
                    .await
                    .map_err(StoreError::Crypto)?
            } else {
                self.crypto
                    .encrypt(&tenant_id, record.sys.id, &plain, level)
                    .await
                    .map_err(StoreError::Crypto)?
            };
            record.set_field(field, JsonValue::String(stored));
        }
        Ok(level)
    }

    /// Decrypt what the row's stamped level allows; leave the rest in place.
    async fn apply_read_policy(
        &self,
        spec: &TableSpec,
        mut record: EntityRecord,
    ) -> Result<EntityRecord, StoreError> {
        if !spec.is_encrypted || !record.sys.encryption_level.server_decryptable() {
            return Ok(record);
        }
        let Some(tenant_id) = record.sys.tenant_id.clone() else {
            return Ok(record);
        };

        for field in &spec.encrypted_fields {
            let Some(stored) = record.str_field(field).map(str::to_string) else {
                continue;
            };
            let plain = if DETERMINISTIC_FIELDS.contains(&field.as_str()) {
                self.crypto
                    .read_deterministic(&tenant_id, &stored)
                    .await
                    .map_err(StoreError::Crypto)?
            } else {
                match self
                    .crypto
                    .read(&tenant_id, record.sys.id, &stored, record.sys.encryption_level)
                    .await
                    .map_err(StoreError::Crypto)?
                {
                    FieldValue::Plaintext(s) => s,
                    FieldValue::Ciphertext(s) => s,
                }
            };
            record.set_field(field, JsonValue::String(plain));
        }
        Ok(record)
    }
}

/// Parse a JSONB row into an `EntityRecord`.
pub fn parse_record(table: &str, value: JsonValue) -> Result<EntityRecord, StoreError> {
    serde_json::from_value(value).map_err(|e| StoreError::Conversion {
        table: table.to_string(),
        reason: e.to_string(),
    })
}

/// Convert a typed entity into the generic record shape.
pub fn record_from<T: Serialize>(table: &str, value: &T) -> Result<EntityRecord, StoreError> {
    let json = serde_json::to_value(value).map_err(|e| StoreError::Conversion {
        table: table.to_string(),
        reason: e.to_string(),
    })?;
    parse_record(table, json)
}

/// Convert a generic record into a typed entity.
pub fn record_into<T: DeserializeOwned>(table: &str, record: EntityRecord) -> Result<T, StoreError> {
    let json = serde_json::to_value(&record).map_err(|e| StoreError::Conversion {
        table: table.to_string(),
        reason: e.to_string(),
    })?;
    serde_json::from_value(json).map_err(|e| StoreError::Conversion {
        table: table.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rem_core::{EntityIdType, MessageType, SessionId, SystemFields};

    #[test]
    fn typed_entities_round_trip_through_records() {
        let session_id = SessionId::now_v7();
        let message = rem_core::Message {
            sys: SystemFields::new(Uuid::new_v4()).with_tenant("t1"),
            session_id,
            message_type: MessageType::User,
            content: "hello".to_string(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            input_tokens: None,
            output_tokens: Some(12),
            latency_ms: None,
            model: None,
            agent_name: None,
        };

        let record = record_from("messages", &message).unwrap();
        assert_eq!(record.str_field("content"), Some("hello"));
        assert_eq!(record.sys.tenant_id.as_deref(), Some("t1"));

        let back: rem_core::Message = record_into("messages", record).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn parse_record_rejects_non_objects() {
        assert!(parse_record("users", JsonValue::String("nope".into())).is_err());
    }
}
