//! Reversible PII redaction map
//!
//! Tokens stand in for PII in text shipped to external collaborators; the
//! original value is stored encrypted under the tenant DEK, scoped by
//! (tenant, entity, session). Mappings are derived rows: they die with their
//! source entity.

use crate::Db;
use rem_core::{short_hash, StoreError};
use rem_crypto::{EncryptionService, FieldValue};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct RedactionMap {
    db: Db,
    crypto: Arc<EncryptionService>,
}

impl RedactionMap {
    pub fn new(db: Db, crypto: Arc<EncryptionService>) -> Self {
        Self { db, crypto }
    }

    /// Deterministic token for a value within its scope, e.g. `[PII:3f9a2c]`.
    pub fn token_for(tenant_id: &str, entity_id: Uuid, value: &str) -> String {
        format!(
            "[PII:{}]",
            short_hash(&format!("{tenant_id}:{entity_id}:{value}"), 6)
        )
    }

    /// Store a mapping, returning the token. Idempotent per (tenant, entity,
    /// token).
    pub async fn redact(
        &self,
        tenant_id: &str,
        entity_id: Uuid,
        session_id: Option<Uuid>,
        value: &str,
    ) -> Result<String, StoreError> {
        let token = Self::token_for(tenant_id, entity_id, value);
        let encrypted = self
            .crypto
            .encrypt(tenant_id, entity_id, value, rem_core::EncryptionLevel::Platform)
            .await
            .map_err(StoreError::Crypto)?;

        self.db
            .execute(
                "INSERT INTO redaction_mappings (tenant_id, entity_id, session_id, token, encrypted_value) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (tenant_id, entity_id, token) DO UPDATE SET \
                     encrypted_value = EXCLUDED.encrypted_value",
                &[&tenant_id, &entity_id, &session_id, &token, &encrypted],
            )
            .await?;
        Ok(token)
    }

    /// Reverse a token back to its plaintext value.
    pub async fn resolve(
        &self,
        tenant_id: &str,
        entity_id: Uuid,
        token: &str,
    ) -> Result<Option<String>, StoreError> {
        let row = self
            .db
            .query_opt(
                "SELECT encrypted_value FROM redaction_mappings \
                 WHERE tenant_id = $1 AND entity_id = $2 AND token = $3",
                &[&tenant_id, &entity_id, &token],
            )
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let encrypted: String = row.get(0);
        match self
            .crypto
            .read(tenant_id, entity_id, &encrypted, rem_core::EncryptionLevel::Platform)
            .await
            .map_err(StoreError::Crypto)?
        {
            FieldValue::Plaintext(value) => Ok(Some(value)),
            FieldValue::Ciphertext(_) => Ok(None),
        }
    }

    /// Drop all mappings for an entity (on soft delete of the source row).
    pub async fn purge_entity(&self, tenant_id: &str, entity_id: Uuid) -> Result<u64, StoreError> {
        self.db
            .execute(
                "DELETE FROM redaction_mappings WHERE tenant_id = $1 AND entity_id = $2",
                &[&tenant_id, &entity_id],
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_deterministic_and_scoped() {
        let entity = Uuid::nil();
        let a = RedactionMap::token_for("t1", entity, "alice@example.com");
        let b = RedactionMap::token_for("t1", entity, "alice@example.com");
        assert_eq!(a, b);
        assert!(a.starts_with("[PII:") && a.ends_with(']'));

        let other_tenant = RedactionMap::token_for("t2", entity, "alice@example.com");
        assert_ne!(a, other_tenant);
        let other_value = RedactionMap::token_for("t1", entity, "bob@example.com");
        assert_ne!(a, other_value);
    }
}
