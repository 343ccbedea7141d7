//! Postgres-backed tenant key store

use crate::Db;
use async_trait::async_trait;
use rem_core::{EncryptionMode, StoreError, TenantKeyRecord};
use rem_crypto::TenantKeyStore;
use std::str::FromStr;

pub struct PgTenantKeyStore {
    db: Db,
}

impl PgTenantKeyStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TenantKeyStore for PgTenantKeyStore {
    async fn load(&self, tenant_id: &str) -> Result<Option<TenantKeyRecord>, StoreError> {
        let row = self
            .db
            .query_opt(
                "SELECT tenant_id, wrapped_dek, kms_key_id, algorithm, mode, \
                 public_key_pem, rotated_at, created_at \
                 FROM tenant_keys WHERE tenant_id = $1",
                &[&tenant_id],
            )
            .await?;

        row.map(|r| {
            let mode: String = r.get(4);
            Ok(TenantKeyRecord {
                tenant_id: r.get(0),
                wrapped_dek: r.get(1),
                kms_key_id: r.get(2),
                algorithm: r.get(3),
                mode: EncryptionMode::from_str(&mode).map_err(|e| StoreError::Conversion {
                    table: "tenant_keys".to_string(),
                    reason: e,
                })?,
                public_key_pem: r.get(5),
                rotated_at: r.get(6),
                created_at: r.get(7),
            })
        })
        .transpose()
    }

    async fn save(&self, record: &TenantKeyRecord) -> Result<(), StoreError> {
        self.db
            .execute(
                "INSERT INTO tenant_keys (tenant_id, wrapped_dek, kms_key_id, algorithm, \
                 mode, public_key_pem, rotated_at, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
                 ON CONFLICT (tenant_id) DO UPDATE SET \
                     wrapped_dek = EXCLUDED.wrapped_dek, \
                     kms_key_id = EXCLUDED.kms_key_id, \
                     algorithm = EXCLUDED.algorithm, \
                     mode = EXCLUDED.mode, \
                     public_key_pem = EXCLUDED.public_key_pem, \
                     rotated_at = EXCLUDED.rotated_at",
                &[
                    &record.tenant_id,
                    &record.wrapped_dek,
                    &record.kms_key_id,
                    &record.algorithm,
                    &record.mode.as_str(),
                    &record.public_key_pem,
                    &record.rotated_at,
                    &record.created_at,
                ],
            )
            .await?;
        Ok(())
    }
}
