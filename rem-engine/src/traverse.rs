//! Breadth-first graph traversal
//!
//! Walks `graph_edges` from a seed KV entry. Cycles are legal in the data
//! and broken per walk by a visited set. Ordering is stable: depth
//! ascending, then ascending normalised target key within one depth level.
//! Edge weights ride along as metadata and never affect order.

use crate::ast::QueryScope;
use rem_core::{normalise_key, StoreError};
use rem_store::{EntityStore, KvIndex};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use uuid::Uuid;

/// Depth used when the query omits `DEPTH`.
pub const DEFAULT_DEPTH: u32 = 1;

/// One node discovered by a traversal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraverseNode {
    pub key: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub content_summary: Option<String>,
    pub metadata: JsonValue,
    pub depth: u32,
    /// Relation on the edge that discovered this node; `None` for the seed.
    pub relation: Option<String>,
    /// Weight on the discovering edge.
    pub weight: Option<f64>,
    /// Full source row when `LOAD` was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<JsonValue>,
}

/// Run a breadth-first walk. With depth 0 the seed node alone is returned.
pub async fn traverse(
    kv: &KvIndex,
    store: Option<&EntityStore>,
    scope: &QueryScope,
    start_key: &str,
    max_depth: u32,
    relation_filter: Option<&str>,
) -> Result<Vec<TraverseNode>, StoreError> {
    let tenant = scope.tenant_id.as_deref();

    let Some(seed) = kv.entry(start_key, tenant).await? else {
        return Ok(Vec::new());
    };

    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(seed.entity_key.clone());

    let mut nodes = vec![TraverseNode {
        key: seed.entity_key.clone(),
        entity_type: seed.entity_type.clone(),
        entity_id: seed.entity_id,
        content_summary: seed.content_summary.clone(),
        metadata: seed.metadata.clone(),
        depth: 0,
        relation: None,
        weight: None,
        entity: None,
    }];
    let mut frontier = vec![seed];

    for depth in 1..=max_depth {
        // Candidate targets from the whole current level, deduped on first
        // discovery and ordered by normalised key for the tie-break rule.
        let mut candidates: Vec<(String, String, Option<f64>)> = Vec::new();
        for entry in &frontier {
            for edge in &entry.graph_edges {
                if let Some(filter) = relation_filter {
                    if edge.relation != filter {
                        continue;
                    }
                }
                let target = normalise_key(&edge.target);
                if target.is_empty() || visited.contains(&target) {
                    continue;
                }
                if candidates.iter().any(|(t, _, _)| *t == target) {
                    continue;
                }
                candidates.push((target, edge.relation.clone(), edge.weight));
            }
        }
        candidates.sort_by(|a, b| a.0.cmp(&b.0));

        let mut next_frontier = Vec::new();
        for (target, relation, weight) in candidates {
            visited.insert(target.clone());
            let Some(entry) = kv.entry(&target, tenant).await? else {
                // Dangling edge: the target has no KV row (deleted or never
                // synced). Skipped rather than surfaced.
                continue;
            };
            nodes.push(TraverseNode {
                key: entry.entity_key.clone(),
                entity_type: entry.entity_type.clone(),
                entity_id: entry.entity_id,
                content_summary: entry.content_summary.clone(),
                metadata: entry.metadata.clone(),
                depth,
                relation: Some(relation),
                weight,
                entity: None,
            });
            next_frontier.push(entry);
        }

        if next_frontier.is_empty() {
            break;
        }
        frontier = next_frontier;
    }

    // LOAD joins each hit to its source table for the full row.
    if let Some(store) = store {
        for node in &mut nodes {
            if let Some(record) = store.get(&node.entity_type, node.entity_id).await? {
                node.entity = Some(serde_json::to_value(&record).map_err(|e| {
                    StoreError::Conversion {
                        table: node.entity_type.clone(),
                        reason: e.to_string(),
                    }
                })?);
            }
        }
    }

    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Pure ordering rule checked here; the walk itself is exercised in the
    // db-gated integration suite.
    #[test]
    fn candidate_ordering_is_by_normalised_key() {
        let mut candidates: Vec<(String, String, Option<()>)> = vec![
            ("zeta".to_string(), "rel".to_string(), None),
            ("alpha".to_string(), "rel".to_string(), None),
            ("midway".to_string(), "rel".to_string(), None),
        ];
        candidates.sort_by(|a, b| a.0.cmp(&b.0));
        let keys: Vec<_> = candidates.iter().map(|c| c.0.as_str()).collect();
        assert_eq!(keys, ["alpha", "midway", "zeta"]);
    }
}
