//! REM dispatch
//!
//! Parses a query and routes it to the matching index: KV for LOOKUP,
//! vectors for SEARCH, trigram for FUZZY, graph for TRAVERSE, and guarded
//! raw SQL for everything else. Tenant/user scopes filter every row
//! returned, whatever the mode.

use crate::{ensure_read_only, parse, traverse, QueryScope, RemQuery, DEFAULT_DEPTH};
use rem_core::{QueryError, RemError, StoreError};
use rem_llm::EmbeddingProvider;
use rem_store::{vector_literal, EntityStore, KvIndex};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

const DEFAULT_LIMIT: i32 = 10;

/// A query result: mode label plus row objects. SEARCH and FUZZY rows carry
/// a `similarity_score` in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemResponse {
    pub mode: String,
    pub results: Vec<JsonValue>,
}

pub struct RemEngine {
    store: Arc<EntityStore>,
    kv: KvIndex,
    embeddings: Arc<dyn EmbeddingProvider>,
    min_similarity: f32,
}

impl RemEngine {
    pub fn new(
        store: Arc<EntityStore>,
        kv: KvIndex,
        embeddings: Arc<dyn EmbeddingProvider>,
        min_similarity: f32,
    ) -> Self {
        Self {
            store,
            kv,
            embeddings,
            min_similarity,
        }
    }

    /// Parse and execute one query under a scope.
    pub async fn execute(&self, source: &str, scope: &QueryScope) -> Result<RemResponse, RemError> {
        let query = parse(source)?;
        let mode = query.mode().to_string();
        tracing::debug!(%mode, "dispatching REM query");

        let results = match query {
            RemQuery::Lookup { key } => self.lookup(&key, scope).await?,
            RemQuery::Search {
                text,
                table,
                category,
                limit,
                min_similarity,
            } => {
                self.search(&text, &table, category.as_deref(), limit, min_similarity, scope)
                    .await?
            }
            RemQuery::Fuzzy { text, limit } => self.fuzzy(&text, limit, scope).await?,
            RemQuery::Traverse {
                key,
                depth,
                relation,
                load,
            } => {
                self.traverse(&key, depth, relation.as_deref(), load, scope)
                    .await?
            }
            RemQuery::Sql { query } => self.raw_sql(&query, scope).await?,
        };

        Ok(RemResponse {
            mode,
            results: apply_scope(results, scope),
        })
    }

    async fn lookup(&self, key: &str, scope: &QueryScope) -> Result<Vec<JsonValue>, RemError> {
        let hit = self.kv.lookup(key, scope.tenant_id.as_deref()).await?;
        Ok(hit
            .map(|h| {
                serde_json::json!({
                    "entity_key": h.entity_key,
                    "entity_type": h.entity_type,
                    "entity_id": h.entity_id,
                    "content_summary": h.content_summary,
                    "graph_edges": h.graph_edges,
                    "entity": h.entity,
                })
            })
            .into_iter()
            .collect())
    }

    async fn search(
        &self,
        text: &str,
        table: &str,
        category: Option<&str>,
        limit: Option<i32>,
        min_similarity: Option<f32>,
        scope: &QueryScope,
    ) -> Result<Vec<JsonValue>, RemError> {
        // Validate the table against the registry before it reaches dynamic
        // SQL.
        let spec = self
            .store
            .registry()
            .spec(table)
            .await
            .map_err(|_| QueryError::UnknownTable {
                table: table.to_string(),
            })?;
        if !spec.has_embeddings {
            return Err(QueryError::UnknownTable {
                table: format!("{table} (no embeddings)"),
            }
            .into());
        }

        let vector = self.embeddings.embed(text).await?;
        let literal = vector_literal(&vector);
        let limit = limit.unwrap_or(DEFAULT_LIMIT);
        let min = min_similarity.unwrap_or(self.min_similarity);

        let rows = self
            .store
            .db()
            .query_json_array(
                "SELECT rem_vector_search($1, $2::vector, $3, $4, $5, $6, $7)",
                &[
                    &table,
                    &literal,
                    &scope.tenant_id,
                    &scope.user_id,
                    &category,
                    &limit,
                    &min,
                ],
            )
            .await?;
        Ok(rows)
    }

    async fn fuzzy(
        &self,
        text: &str,
        limit: Option<i32>,
        scope: &QueryScope,
    ) -> Result<Vec<JsonValue>, RemError> {
        let hits = self
            .kv
            .fuzzy(
                text,
                scope.tenant_id.as_deref(),
                limit.unwrap_or(DEFAULT_LIMIT),
                self.min_similarity,
            )
            .await?;
        hits.into_iter()
            .map(|h| {
                serde_json::to_value(&serde_json::json!({
                    "entity_key": h.entity_key,
                    "entity_type": h.entity_type,
                    "entity_id": h.entity_id,
                    "content_summary": h.content_summary,
                    "similarity_score": h.similarity_score,
                }))
                .map_err(|e| {
                    RemError::Store(StoreError::Conversion {
                        table: "kv_store".to_string(),
                        reason: e.to_string(),
                    })
                })
            })
            .collect()
    }

    async fn traverse(
        &self,
        key: &str,
        depth: Option<u32>,
        relation: Option<&str>,
        load: bool,
        scope: &QueryScope,
    ) -> Result<Vec<JsonValue>, RemError> {
        let store = load.then_some(self.store.as_ref());
        let nodes = traverse(
            &self.kv,
            store,
            scope,
            key,
            depth.unwrap_or(DEFAULT_DEPTH),
            relation,
        )
        .await?;
        nodes
            .into_iter()
            .map(|n| {
                serde_json::to_value(&n).map_err(|e| {
                    RemError::Store(StoreError::Conversion {
                        table: "kv_store".to_string(),
                        reason: e.to_string(),
                    })
                })
            })
            .collect()
    }

    async fn raw_sql(&self, sql: &str, _scope: &QueryScope) -> Result<Vec<JsonValue>, RemError> {
        ensure_read_only(sql)?;
        let wrapped = format!(
            "SELECT coalesce(jsonb_agg(to_jsonb(q)), '[]'::jsonb) FROM ({}) q",
            sql.trim_end_matches(';')
        );
        let rows = self.store.db().query_json_array(&wrapped, &[]).await?;
        Ok(rows)
    }
}

/// Drop rows whose tenant/user fields contradict the scope. Rows without
/// those fields pass through.
fn apply_scope(results: Vec<JsonValue>, scope: &QueryScope) -> Vec<JsonValue> {
    results
        .into_iter()
        .filter(|row| {
            if let (Some(tenant), Some(row_tenant)) = (
                scope.tenant_id.as_deref(),
                row.get("tenant_id").and_then(|v| v.as_str()),
            ) {
                if tenant != row_tenant {
                    return false;
                }
            }
            if let (Some(user), Some(row_user)) = (
                scope.user_id,
                row.get("user_id")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse::<uuid::Uuid>().ok()),
            ) {
                if user != row_user {
                    return false;
                }
            }
            true
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scope_filters_contradicting_rows() {
        let scope = QueryScope {
            tenant_id: Some("t1".to_string()),
            user_id: None,
        };
        let rows = vec![
            json!({"tenant_id": "t1", "name": "keep"}),
            json!({"tenant_id": "t2", "name": "drop"}),
            json!({"name": "no-tenant-field"}),
        ];
        let filtered = apply_scope(rows, &scope);
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0]["name"], "keep");
        assert_eq!(filtered[1]["name"], "no-tenant-field");
    }

    #[test]
    fn user_scope_compares_uuids() {
        let user = uuid::Uuid::new_v4();
        let scope = QueryScope {
            tenant_id: None,
            user_id: Some(user),
        };
        let rows = vec![
            json!({"user_id": user.to_string()}),
            json!({"user_id": uuid::Uuid::new_v4().to_string()}),
        ];
        assert_eq!(apply_scope(rows, &scope).len(), 1);
    }
}
