//! Dreaming handler
//!
//! Two phases. Phase 1 needs no LLM: compact the user's recently active
//! sessions into `session_chunk` moments and enrich their summaries with
//! excerpts from uploaded resources. Phase 2 gathers a bounded context and
//! asks the dreamer agent for structured `DreamMoment`s, which land as
//! `dream` moments with affinity edges; every referenced source gets a
//! `dreamed_from` back-edge written to its own table, never to the KV index.

use crate::handlers::TaskHandler;
use async_trait::async_trait;
use rem_agents::{AgentRunOptions, AgentRuntime};
use rem_core::{
    estimate_tokens, normalise_key, truncate_chars, AgentError, EntityIdType, GraphEdge,
    Moment, MomentId, MomentType, RemError, SessionId, StoreError, SystemFields, Task,
};
use rem_memory::{build_session_moment, MemoryService};
use rem_queue::TASK_DREAMING;
use rem_store::{record_from, record_into, EntityStore, KvIndex, WriteOptions};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use std::sync::Arc;
use uuid::Uuid;

/// The agent row driving phase 2.
pub const DREAMER_AGENT: &str = "dreamer";

const MAX_SESSIONS_PHASE1: i64 = 10;
const MAX_CONTEXT_MOMENTS: i32 = 50;
const MAX_CONTEXT_SESSIONS: i64 = 5;
const MAX_MESSAGES_PER_SESSION: usize = 20;
const MAX_CONTEXT_FILES: i32 = 10;
const MAX_CONTEXT_RESOURCES: usize = 10;
const RESOURCE_EXCERPT_CHARS: usize = 500;
/// ~30% of the assumed model context window.
const CONTEXT_TOKEN_CAP: i64 = 38_000;

/// One dreamed association from the structured output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DreamMoment {
    pub name: String,
    pub summary: String,
    #[serde(default)]
    pub affinity_fragments: Vec<AffinityFragment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffinityFragment {
    /// Entity key the dream associates with.
    pub target: String,
    #[serde(default = "default_relation")]
    pub relation: String,
    #[serde(default)]
    pub weight: Option<f64>,
}

fn default_relation() -> String {
    "relates_to".to_string()
}

pub struct DreamingHandler {
    store: Arc<EntityStore>,
    memory: Arc<MemoryService>,
    agents: Arc<AgentRuntime>,
    kv: KvIndex,
}

impl DreamingHandler {
    pub fn new(
        store: Arc<EntityStore>,
        memory: Arc<MemoryService>,
        agents: Arc<AgentRuntime>,
        kv: KvIndex,
    ) -> Self {
        Self {
            store,
            memory,
            agents,
            kv,
        }
    }

    /// Phase 1: compact recent sessions; no LLM involved.
    async fn phase_one(&self, user_id: Uuid) -> Result<u64, RemError> {
        let rows = self
            .store
            .db()
            .query(
                "SELECT id FROM sessions \
                 WHERE user_id = $1 AND deleted_at IS NULL \
                   AND (mode IS NULL OR mode <> 'dreaming') \
                 ORDER BY updated_at DESC LIMIT $2",
                &[&user_id, &MAX_SESSIONS_PHASE1],
            )
            .await
            .map_err(RemError::Store)?;

        let excerpts = self.upload_excerpts(user_id).await?;

        let mut built = 0u64;
        for row in rows {
            let session_id = SessionId::new(row.get(0));
            let threshold = self.memory.config().moment_threshold.max(1);
            let moment = build_session_moment(self.store.as_ref(), session_id, threshold)
                .await
                .map_err(RemError::Memory)?;

            if let Some(mut moment) = moment {
                built += 1;
                if !excerpts.is_empty() {
                    let enriched = format!(
                        "{}\n[Context] {}",
                        moment.summary.unwrap_or_default(),
                        excerpts.join(" | ")
                    );
                    moment.summary = Some(enriched);
                    self.store
                        .upsert(
                            "moments",
                            record_from("moments", &moment)?,
                            WriteOptions::default(),
                        )
                        .await?;
                }
            }
        }
        Ok(built)
    }

    /// Resource excerpts reachable from upload moments, deduped against the
    /// directly user-scoped resources. Direct scope loads first (recency
    /// order), then edge-discovered resources in edge order; first writer
    /// wins, making the ordering canonical.
    async fn upload_excerpts(&self, user_id: Uuid) -> Result<Vec<String>, RemError> {
        let mut seen: Vec<Uuid> = Vec::new();
        let mut excerpts = Vec::new();

        let mut filters = Map::new();
        filters.insert("user_id".into(), json!(user_id));
        let direct = self
            .store
            .find("resources", &filters, MAX_CONTEXT_RESOURCES as i32)
            .await?;
        for record in direct {
            seen.push(record.sys.id);
            if let Some(content) = record.str_field("content") {
                excerpts.push(truncate_chars(content, RESOURCE_EXCERPT_CHARS));
            }
        }

        let mut moment_filters = Map::new();
        moment_filters.insert("user_id".into(), json!(user_id));
        moment_filters.insert("moment_type".into(), json!("content_upload"));
        let uploads = self.store.find("moments", &moment_filters, 5).await?;
        for upload in uploads {
            for edge in &upload.sys.graph_edges {
                if excerpts.len() >= MAX_CONTEXT_RESOURCES {
                    break;
                }
                let Some(entry) = self.kv.entry(&edge.target, upload.sys.tenant_id.as_deref()).await?
                else {
                    continue;
                };
                if entry.entity_type != "resources" || seen.contains(&entry.entity_id) {
                    continue;
                }
                seen.push(entry.entity_id);
                if let Some(record) = self.store.get("resources", entry.entity_id).await? {
                    if let Some(content) = record.str_field("content") {
                        excerpts.push(truncate_chars(content, RESOURCE_EXCERPT_CHARS));
                    }
                }
            }
        }
        Ok(excerpts)
    }

    /// Phase 2: bounded context in, structured dreams out. Returns the
    /// dream names and the tokens the dreamer call consumed.
    async fn phase_two(&self, task: &Task, user_id: Uuid) -> Result<(Vec<String>, i64), RemError> {
        let context = self.gather_context(user_id).await?;
        let allow_empty = task
            .payload
            .get("allow_empty")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        let outcome = self
            .agents
            .run(
                DREAMER_AGENT,
                &context,
                AgentRunOptions {
                    session_id: None,
                    tenant_id: task.tenant_id.clone(),
                    user_id: Some(user_id),
                    extra_sections: Vec::new(),
                    events: None,
                },
            )
            .await
            .map_err(RemError::Agent)?;

        let tokens_used = outcome.usage.input_tokens.unwrap_or(0)
            + outcome.usage.output_tokens.unwrap_or(0);
        let structured = outcome.structured.ok_or_else(|| {
            RemError::Agent(AgentError::OutputMismatch {
                reason: "dreamer returned no structured output".to_string(),
            })
        })?;
        let dreams: Vec<DreamMoment> = serde_json::from_value(
            structured.get("dreams").cloned().unwrap_or(JsonValue::Array(vec![])),
        )
        .map_err(|e| {
            RemError::Agent(AgentError::OutputMismatch {
                reason: format!("dreams list is malformed: {e}"),
            })
        })?;

        if dreams.is_empty() && !allow_empty {
            return Err(RemError::Agent(AgentError::OutputMismatch {
                reason: "dreamer produced no dreams and allow_empty=false".to_string(),
            }));
        }

        let mut names = Vec::with_capacity(dreams.len());
        for dream in dreams {
            names.push(self.persist_dream(task, user_id, dream).await?);
        }
        Ok((names, tokens_used))
    }

    async fn persist_dream(
        &self,
        task: &Task,
        user_id: Uuid,
        dream: DreamMoment,
    ) -> Result<String, RemError> {
        let name = format!("dream-{}", normalise_key(&dream.name));
        let id = MomentId::deterministic(&name, Some(user_id));
        let dream_key = normalise_key(&name);

        let mut sys = SystemFields::new(id.as_uuid());
        sys.tenant_id = task.tenant_id.clone();
        sys.user_id = Some(user_id);
        sys.graph_edges = dream
            .affinity_fragments
            .iter()
            .map(|f| {
                let mut edge = GraphEdge::new(normalise_key(&f.target), f.relation.clone());
                edge.weight = f.weight;
                edge
            })
            .collect();

        let moment = Moment {
            sys,
            name: name.clone(),
            moment_type: MomentType::Dream,
            summary: Some(dream.summary.clone()),
            starts_timestamp: Some(chrono::Utc::now()),
            previous_moment_keys: Vec::new(),
            session_id: None,
        };
        self.store
            .upsert("moments", record_from("moments", &moment)?, WriteOptions::default())
            .await?;

        // Back-edges are authoritative on the source tables; the KV rows
        // reconcile through the triggers.
        for fragment in &dream.affinity_fragments {
            let Some(entry) = self
                .kv
                .entry(&fragment.target, task.tenant_id.as_deref())
                .await?
            else {
                continue;
            };
            let Some(mut record) = self.store.get(&entry.entity_type, entry.entity_id).await?
            else {
                continue;
            };
            record.sys.graph_edges = rem_core::merge_edges(
                &record.sys.graph_edges,
                &[GraphEdge::new(dream_key.clone(), "dreamed_from")],
            );
            self.store
                .upsert(&entry.entity_type, record, WriteOptions::default())
                .await?;
        }

        Ok(name)
    }

    /// Bounded context: recent moments, a few sessions of messages, recent
    /// files and resources, all clipped to the token cap.
    async fn gather_context(&self, user_id: Uuid) -> Result<String, RemError> {
        let mut sections: Vec<String> = Vec::new();

        let mut filters = Map::new();
        filters.insert("user_id".into(), json!(user_id));
        let moments = self.store.find("moments", &filters, MAX_CONTEXT_MOMENTS).await?;
        for record in &moments {
            let moment: Moment = record_into("moments", record.clone())?;
            if let Some(summary) = &moment.summary {
                sections.push(format!("[moment {}] {}", moment.name, summary));
            }
        }

        let session_rows = self
            .store
            .db()
            .query(
                "SELECT id FROM sessions WHERE user_id = $1 AND deleted_at IS NULL \
                 ORDER BY updated_at DESC LIMIT $2",
                &[&user_id, &MAX_CONTEXT_SESSIONS],
            )
            .await
            .map_err(RemError::Store)?;
        for row in session_rows {
            let session_id = SessionId::new(row.get(0));
            let messages =
                rem_memory::messages_since(self.store.as_ref(), session_id, None)
                    .await
                    .map_err(RemError::Memory)?;
            for message in messages.iter().rev().take(MAX_MESSAGES_PER_SESSION) {
                sections.push(format!(
                    "[session {} {}] {}",
                    session_id,
                    message.message_type,
                    message.content
                ));
            }
        }

        let files = self.store.find("files", &filters, MAX_CONTEXT_FILES).await?;
        for record in &files {
            sections.push(format!("[file] {}", record.name_key()));
        }

        let excerpts = self.upload_excerpts(user_id).await?;
        for excerpt in excerpts {
            sections.push(format!("[resource] {excerpt}"));
        }

        // Clip to the context budget, newest-first priority being the order
        // sections were gathered.
        let mut budget = CONTEXT_TOKEN_CAP;
        let mut out = Vec::new();
        for section in sections {
            let cost = estimate_tokens(&section);
            if cost > budget {
                break;
            }
            budget -= cost;
            out.push(section);
        }
        Ok(out.join("\n"))
    }
}

#[async_trait]
impl TaskHandler for DreamingHandler {
    fn task_type(&self) -> &str {
        TASK_DREAMING
    }

    fn resource_type(&self) -> &str {
        rem_queue::resources::TOKENS
    }

    async fn handle(&self, task: &Task) -> Result<JsonValue, RemError> {
        let user_id = task.user_id.ok_or_else(|| {
            RemError::Store(StoreError::Conversion {
                table: "task_queue".to_string(),
                reason: "dreaming task has no user_id".to_string(),
            })
        })?;

        let chunks_built = self.phase_one(user_id).await?;
        let (dreams, tokens_used) = self.phase_two(task, user_id).await?;

        tracing::info!(
            user_id = %user_id,
            chunks = chunks_built,
            dreams = dreams.len(),
            tokens = tokens_used,
            "dreaming complete"
        );
        Ok(json!({
            "session_chunks": chunks_built,
            "dreams": dreams,
            "tokens_used": tokens_used,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dream_moment_parses_with_defaults() {
        let dream: DreamMoment = serde_json::from_value(json!({
            "name": "Coffee and Deadlines",
            "summary": "Late-night sessions cluster around espresso purchases.",
            "affinity_fragments": [{"target": "Espresso Notes"}],
        }))
        .unwrap();
        assert_eq!(dream.affinity_fragments[0].relation, "relates_to");
        assert!(dream.affinity_fragments[0].weight.is_none());
    }

    #[test]
    fn missing_fragments_default_to_empty() {
        let dream: DreamMoment =
            serde_json::from_value(json!({"name": "n", "summary": "s"})).unwrap();
        assert!(dream.affinity_fragments.is_empty());
    }
}
