//! KV index access
//!
//! Lookup and fuzzy match over the change-triggered cache, plus the rebuild
//! and drift-verification entry points. The index is derived state: edges and
//! summaries are authoritative on the source tables, never here.

use crate::{rows, Db};
use rem_core::{GraphEdge, KvEntry, StoreError};
use serde_json::Value as JsonValue;

/// A LOOKUP result: the KV row joined to its full source row.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupHit {
    pub entity_key: String,
    pub entity_type: String,
    pub entity_id: uuid::Uuid,
    pub content_summary: Option<String>,
    pub graph_edges: Vec<GraphEdge>,
    /// Full source row as JSONB; `None` when the source was soft-deleted
    /// after the KV row was read.
    pub entity: Option<JsonValue>,
}

/// A FUZZY result with its trigram score.
#[derive(Debug, Clone, PartialEq)]
pub struct FuzzyHit {
    pub entity_key: String,
    pub entity_type: String,
    pub entity_id: uuid::Uuid,
    pub content_summary: Option<String>,
    pub similarity_score: f64,
}

#[derive(Clone)]
pub struct KvIndex {
    db: Db,
}

impl KvIndex {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// KV lookup with dynamic join to the source table.
    pub async fn lookup(
        &self,
        key: &str,
        tenant_id: Option<&str>,
    ) -> Result<Option<LookupHit>, StoreError> {
        let json = self
            .db
            .query_json_opt("SELECT rem_lookup($1, $2)", &[&key, &tenant_id])
            .await?;
        json.map(|j| {
            Ok(LookupHit {
                entity_key: rows::parse_string(&j, "kv_store", "entity_key")?,
                entity_type: rows::parse_string(&j, "kv_store", "entity_type")?,
                entity_id: rows::parse_uuid(&j, "kv_store", "entity_id")?,
                content_summary: rows::parse_optional_string(&j, "content_summary"),
                graph_edges: parse_edges(j.get("graph_edges")),
                entity: j.get("entity").filter(|v| !v.is_null()).cloned(),
            })
        })
        .transpose()
    }

    /// Raw KV entry for one normalised key, without the source join. Used by
    /// traversal, which only needs keys, summaries, and edges.
    pub async fn entry(
        &self,
        key: &str,
        tenant_id: Option<&str>,
    ) -> Result<Option<KvEntry>, StoreError> {
        let row = self
            .db
            .query_opt(
                "SELECT tenant_id, entity_key, entity_type, entity_id, content_summary, \
                 metadata, graph_edges, updated_at \
                 FROM kv_store \
                 WHERE entity_key = rem_normalise_key($1) \
                   AND ($2::text IS NULL OR tenant_id = $2) \
                 LIMIT 1",
                &[&key, &tenant_id],
            )
            .await?;

        Ok(row.map(|r| {
            let edges: JsonValue = r.get(6);
            KvEntry {
                tenant_id: r.get(0),
                entity_key: r.get(1),
                entity_type: r.get(2),
                entity_id: r.get(3),
                content_summary: r.get(4),
                metadata: r.get(5),
                graph_edges: parse_edges(Some(&edges)),
                updated_at: r.get(7),
            }
        }))
    }

    /// Trigram similarity against keys and summaries.
    pub async fn fuzzy(
        &self,
        text: &str,
        tenant_id: Option<&str>,
        limit: i32,
        min_similarity: f32,
    ) -> Result<Vec<FuzzyHit>, StoreError> {
        let hits = self
            .db
            .query_json_array(
                "SELECT rem_fuzzy($1, $2, $3, $4)",
                &[&text, &tenant_id, &limit, &min_similarity],
            )
            .await?;

        hits.into_iter()
            .map(|j| {
                Ok(FuzzyHit {
                    entity_key: rows::parse_string(&j, "kv_store", "entity_key")?,
                    entity_type: rows::parse_string(&j, "kv_store", "entity_type")?,
                    entity_id: rows::parse_uuid(&j, "kv_store", "entity_id")?,
                    content_summary: rows::parse_optional_string(&j, "content_summary"),
                    similarity_score: rows::parse_f64(&j, "kv_store", "similarity_score")?,
                })
            })
            .collect()
    }

    /// Crash recovery: truncate and re-insert from every source table.
    pub async fn rebuild_full(&self) -> Result<i64, StoreError> {
        let row = self.db.query_one("SELECT rem_kv_rebuild_full()", &[]).await?;
        let count: i64 = row.get(0);
        tracing::info!(rows = count, "KV index full rebuild complete");
        Ok(count)
    }

    /// Self-healing pass: upsert-where-differs and delete-orphans.
    pub async fn rebuild_incremental(&self) -> Result<i64, StoreError> {
        let row = self
            .db
            .query_one("SELECT rem_kv_rebuild_incremental()", &[])
            .await?;
        let count: i64 = row.get(0);
        if count > 0 {
            tracing::info!(rows = count, "KV index incremental rebuild repaired rows");
        }
        Ok(count)
    }

    /// Compare the registry against installed tables and triggers. A
    /// non-empty result means the installer should be re-run.
    pub async fn verify_all(&self) -> Result<Vec<(String, String)>, StoreError> {
        let rows = self
            .db
            .query("SELECT table_name, detail FROM rem_verify_all()", &[])
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get::<_, String>(0), r.get::<_, String>(1)))
            .collect())
    }

    /// `verify_all` as an invariant: drift is an error.
    pub async fn ensure_no_drift(&self) -> Result<(), StoreError> {
        let drift = self.verify_all().await?;
        match drift.into_iter().next() {
            None => Ok(()),
            Some((table, detail)) => Err(StoreError::SchemaDrift { table, detail }),
        }
    }
}

fn parse_edges(value: Option<&JsonValue>) -> Vec<GraphEdge> {
    value
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}
