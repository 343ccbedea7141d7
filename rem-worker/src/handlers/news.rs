//! News handler
//!
//! Daily per-user brief: the news agent turns the user's interests into a
//! structured headline/body pair, stored as a `content_upload` moment. Small
//! per-task token budget, usage-tracked separately from chat.

use crate::handlers::TaskHandler;
use async_trait::async_trait;
use rem_agents::{AgentRunOptions, AgentRuntime};
use rem_core::{
    AgentError, EntityIdType, Moment, MomentId, MomentType, RemError, StoreError, SystemFields,
    Task,
};
use rem_queue::TASK_NEWS;
use rem_store::{record_from, EntityStore, WriteOptions};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;

pub const NEWS_AGENT: &str = "news-writer";

pub struct NewsHandler {
    store: Arc<EntityStore>,
    agents: Arc<AgentRuntime>,
}

impl NewsHandler {
    pub fn new(store: Arc<EntityStore>, agents: Arc<AgentRuntime>) -> Self {
        Self { store, agents }
    }
}

#[async_trait]
impl TaskHandler for NewsHandler {
    fn task_type(&self) -> &str {
        TASK_NEWS
    }

    fn resource_type(&self) -> &str {
        rem_queue::resources::TOKENS
    }

    async fn handle(&self, task: &Task) -> Result<JsonValue, RemError> {
        let user_id = task.user_id.ok_or_else(|| {
            RemError::Store(StoreError::Conversion {
                table: "task_queue".to_string(),
                reason: "news task has no user_id".to_string(),
            })
        })?;
        let interests: Vec<String> = task
            .payload
            .get("interests")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        let input = format!("Write today's brief for interests: {}", interests.join(", "));
        let outcome = self
            .agents
            .run(
                NEWS_AGENT,
                &input,
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

        let structured = outcome.structured.ok_or_else(|| {
            RemError::Agent(AgentError::OutputMismatch {
                reason: "news agent returned no structured output".to_string(),
            })
        })?;
        let headline = structured
            .get("headline")
            .and_then(|v| v.as_str())
            .unwrap_or("Daily brief");
        let body = structured.get("body").and_then(|v| v.as_str()).unwrap_or_default();

        let date = chrono::Utc::now().date_naive();
        let name = format!("news-{date}");
        let id = MomentId::deterministic(&name, Some(user_id));
        let mut sys = SystemFields::new(id.as_uuid());
        sys.tenant_id = task.tenant_id.clone();
        sys.user_id = Some(user_id);
        sys.metadata = json!({"headline": headline, "interests": interests});

        let moment = Moment {
            sys,
            name: name.clone(),
            moment_type: MomentType::ContentUpload,
            summary: Some(format!("{headline}\n{body}")),
            starts_timestamp: Some(chrono::Utc::now()),
            previous_moment_keys: Vec::new(),
            session_id: None,
        };
        self.store
            .upsert("moments", record_from("moments", &moment)?, WriteOptions::default())
            .await?;

        tracing::info!(user_id = %user_id, moment = %name, "news brief written");
        Ok(json!({
            "moment": name,
            "tokens_used": outcome.usage.output_tokens.unwrap_or(0)
                + outcome.usage.input_tokens.unwrap_or(0),
        }))
    }
}
