//! Reading-summary handler
//!
//! A `reading` moment collects saved items in its metadata; once it has at
//! least one item and no summary, the summariser agent fills the summary in.

use crate::handlers::TaskHandler;
use async_trait::async_trait;
use rem_agents::{AgentRunOptions, AgentRuntime};
use rem_core::{AgentError, Moment, RemError, Task};
use rem_queue::TASK_READING_SUMMARY;
use rem_store::{record_from, record_into, rows, EntityStore, WriteOptions};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;

pub const READING_AGENT: &str = "reading-summarizer";

pub struct ReadingSummaryHandler {
    store: Arc<EntityStore>,
    agents: Arc<AgentRuntime>,
}

impl ReadingSummaryHandler {
    pub fn new(store: Arc<EntityStore>, agents: Arc<AgentRuntime>) -> Self {
        Self { store, agents }
    }
}

#[async_trait]
impl TaskHandler for ReadingSummaryHandler {
    fn task_type(&self) -> &str {
        TASK_READING_SUMMARY
    }

    fn resource_type(&self) -> &str {
        rem_queue::resources::TOKENS
    }

    async fn handle(&self, task: &Task) -> Result<JsonValue, RemError> {
        let moment_id = rows::parse_uuid(&task.payload, "task_queue", "moment_id")
            .map_err(RemError::Store)?;
        let record = self.store.get_required("moments", moment_id).await?;
        let mut moment: Moment = record_into("moments", record)?;

        let items = moment
            .sys
            .metadata
            .get("items")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        if items.is_empty() {
            // The enqueuer filters on items, but the moment may have changed
            // since; nothing to summarise is a completed no-op.
            return Ok(json!({"skipped": "no items"}));
        }

        let listing = items
            .iter()
            .map(|item| {
                item.get("title")
                    .or_else(|| item.get("url"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("untitled")
                    .to_string()
            })
            .collect::<Vec<_>>()
            .join("\n- ");
        let input = format!("Summarise this reading list:\n- {listing}");

        let outcome = self
            .agents
            .run(
                READING_AGENT,
                &input,
                AgentRunOptions {
                    session_id: None,
                    tenant_id: task.tenant_id.clone(),
                    user_id: task.user_id,
                    extra_sections: Vec::new(),
                    events: None,
                },
            )
            .await
            .map_err(RemError::Agent)?;

        let structured = outcome.structured.ok_or_else(|| {
            RemError::Agent(AgentError::OutputMismatch {
                reason: "reading agent returned no structured output".to_string(),
            })
        })?;
        let summary = structured
            .get("summary")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                RemError::Agent(AgentError::OutputMismatch {
                    reason: "reading summary missing 'summary' field".to_string(),
                })
            })?;

        moment.summary = Some(summary.to_string());
        self.store
            .upsert("moments", record_from("moments", &moment)?, WriteOptions::default())
            .await?;

        tracing::info!(moment_id = %moment_id, items = items.len(), "reading list summarised");
        Ok(json!({
            "moment_id": moment_id,
            "items": items.len(),
            "tokens_used": outcome.usage.output_tokens.unwrap_or(0)
                + outcome.usage.input_tokens.unwrap_or(0),
        }))
    }
}
