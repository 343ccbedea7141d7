//! Schema registry
//!
//! Entity behaviour is data-driven from `schemas` rows with `kind='table'`.
//! The registry is the only way service code learns which tables exist and
//! how they behave; nothing iterates a hard-coded table list.

use crate::Db;
use rem_core::{EntityIdType, SchemaId, StoreError, TableSpec};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

const CACHE_TTL: Duration = Duration::from_secs(60);

struct CachedSpecs {
    specs: Arc<Vec<TableSpec>>,
    loaded_at: Instant,
}

pub struct SchemaRegistry {
    db: Db,
    cache: RwLock<Option<CachedSpecs>>,
}

impl SchemaRegistry {
    pub fn new(db: Db) -> Self {
        Self {
            db,
            cache: RwLock::new(None),
        }
    }

    /// All registered table specs, through a short cache.
    pub async fn all(&self) -> Result<Arc<Vec<TableSpec>>, StoreError> {
        if let Some(cached) = self.cache.read().await.as_ref() {
            if cached.loaded_at.elapsed() < CACHE_TTL {
                return Ok(Arc::clone(&cached.specs));
            }
        }

        let specs = Arc::new(self.load().await?);
        *self.cache.write().await = Some(CachedSpecs {
            specs: Arc::clone(&specs),
            loaded_at: Instant::now(),
        });
        Ok(specs)
    }

    /// Spec for one table, or `UnknownTable`.
    pub async fn spec(&self, table: &str) -> Result<TableSpec, StoreError> {
        self.all()
            .await?
            .iter()
            .find(|s| s.table_name == table)
            .cloned()
            .ok_or_else(|| StoreError::UnknownTable {
                table: table.to_string(),
            })
    }

    /// Drop the cache; the next read reloads from the store.
    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    /// Register (or update) a table spec and re-attach triggers so the new
    /// behaviour takes effect immediately.
    pub async fn register(&self, spec: &TableSpec) -> Result<(), StoreError> {
        let id = SchemaId::deterministic(&spec.table_name, None);
        self.db
            .execute(
                "INSERT INTO schemas (id, name, kind, has_kv_sync, has_embeddings, \
                 embedding_field, is_encrypted, encrypted_fields, kv_summary_expr) \
                 VALUES ($1, $2, 'table', $3, $4, $5, $6, $7, $8) \
                 ON CONFLICT (id) DO UPDATE SET \
                     has_kv_sync = EXCLUDED.has_kv_sync, \
                     has_embeddings = EXCLUDED.has_embeddings, \
                     embedding_field = EXCLUDED.embedding_field, \
                     is_encrypted = EXCLUDED.is_encrypted, \
                     encrypted_fields = EXCLUDED.encrypted_fields, \
                     kv_summary_expr = EXCLUDED.kv_summary_expr, \
                     updated_at = now()",
                &[
                    &id.as_uuid(),
                    &spec.table_name,
                    &spec.has_kv_sync,
                    &spec.has_embeddings,
                    &spec.embedding_field,
                    &spec.is_encrypted,
                    &spec.encrypted_fields,
                    &spec.kv_summary_expr,
                ],
            )
            .await?;
        self.db.execute("SELECT rem_attach_triggers()", &[]).await?;
        self.invalidate().await;
        self.capture_snapshot().await?;
        Ok(())
    }

    /// Record the registry state for drift diagnosis. Written after every
    /// registry mutation.
    pub async fn capture_snapshot(&self) -> Result<(), StoreError> {
        self.db
            .execute(
                "INSERT INTO schema_timemachine (snapshot) \
                 SELECT coalesce(jsonb_agg(to_jsonb(s.*)), '[]'::jsonb) \
                 FROM schemas s WHERE s.kind = 'table' AND s.deleted_at IS NULL",
                &[],
            )
            .await?;
        Ok(())
    }

    async fn load(&self) -> Result<Vec<TableSpec>, StoreError> {
        let rows = self
            .db
            .query(
                "SELECT name, has_kv_sync, has_embeddings, embedding_field, \
                 is_encrypted, encrypted_fields, kv_summary_expr \
                 FROM schemas WHERE kind = 'table' AND deleted_at IS NULL \
                 ORDER BY name",
                &[],
            )
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| TableSpec {
                table_name: row.get(0),
                has_kv_sync: row.get(1),
                has_embeddings: row.get(2),
                embedding_field: row.get(3),
                is_encrypted: row.get(4),
                encrypted_fields: row.get(5),
                kv_summary_expr: row.get(6),
            })
            .collect())
    }
}
