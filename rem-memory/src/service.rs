//! Turn persistence
//!
//! One chat turn becomes: a `user` row, interleaved `tool_call` /
//! `tool_response` pairs sharing a correlation id, and the concluding
//! `assistant` row stamped with usage. Message ids are pre-allocated so the
//! AAD (`tenant_id:entity_id`) is known before encryption.

use crate::{build_session_moment, tokens_since_last_moment};
use rem_core::{
    estimate_tokens, EntityIdType, MemoryError, Message, MessageId, MessageType, SessionId,
    SystemFields, ToolCall,
};
use rem_store::{record_from, record_into, EntityStore, WriteOptions};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use uuid::Uuid;

/// One completed tool exchange inside a turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolExchange {
    pub call: ToolCall,
    pub response: JsonValue,
}

/// Usage stamped onto the assistant row. The provider-reported token counts
/// are authoritative for billing; the chars/4 estimate only drives session
/// accounting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnUsage {
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub latency_ms: Option<i64>,
    pub model: Option<String>,
    pub agent_name: Option<String>,
}

/// Pre-allocated ids for the turn's endpoints. Generated when absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct TurnIds {
    pub user_message_id: Option<MessageId>,
    pub assistant_message_id: Option<MessageId>,
}

#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub session_id: SessionId,
    pub tenant_id: Option<String>,
    pub user_id: Option<Uuid>,
    pub user_content: String,
    pub assistant_content: String,
    pub tool_exchanges: Vec<ToolExchange>,
    pub usage: TurnUsage,
    pub ids: TurnIds,
}

/// What a persisted turn produced.
#[derive(Debug, Clone)]
pub struct TurnReceipt {
    pub user_message_id: MessageId,
    pub assistant_message_id: MessageId,
    pub session_total_tokens: i64,
    /// Set when this turn tripped the compaction threshold.
    pub moment_built: Option<String>,
}

pub struct MemoryService {
    store: Arc<EntityStore>,
    config: rem_core::ContextConfig,
}

impl MemoryService {
    pub fn new(store: Arc<EntityStore>, config: rem_core::ContextConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    pub fn config(&self) -> &rem_core::ContextConfig {
        &self.config
    }

    /// Persist one turn. Rows are written user-first with strictly
    /// increasing timestamps so `(created_at, id)` replay order matches the
    /// turn structure.
    pub async fn persist_turn(&self, req: TurnRequest) -> Result<TurnReceipt, MemoryError> {
        let session = self
            .store
            .get("sessions", req.session_id.as_uuid())
            .await?
            .ok_or(MemoryError::SessionNotFound {
                session_id: req.session_id.as_uuid(),
            })?;
        let tenant_id = req.tenant_id.clone().or(session.sys.tenant_id.clone());
        let user_id = req.user_id.or(session.sys.user_id);

        let user_message_id = req.ids.user_message_id.unwrap_or_else(MessageId::now_v7);
        let assistant_message_id = req
            .ids
            .assistant_message_id
            .unwrap_or_else(MessageId::now_v7);

        let base = chrono::Utc::now();
        let mut tick = 0i64;
        let mut stamp = |sys: &mut SystemFields| {
            sys.created_at = base + chrono::Duration::milliseconds(tick);
            sys.updated_at = sys.created_at;
            tick += 1;
        };

        // User row.
        let mut sys = SystemFields::new(user_message_id.as_uuid());
        sys.tenant_id = tenant_id.clone();
        sys.user_id = user_id;
        stamp(&mut sys);
        self.insert_message(Message {
            sys,
            session_id: req.session_id,
            message_type: MessageType::User,
            content: req.user_content.clone(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            input_tokens: None,
            output_tokens: None,
            latency_ms: None,
            model: None,
            agent_name: None,
        })
        .await?;

        // Interleaved tool rows, each pair sharing the correlation id.
        for exchange in &req.tool_exchanges {
            let mut sys = SystemFields::new(Uuid::now_v7());
            sys.tenant_id = tenant_id.clone();
            sys.user_id = user_id;
            stamp(&mut sys);
            self.insert_message(Message {
                sys,
                session_id: req.session_id,
                message_type: MessageType::ToolCall,
                content: exchange.call.arguments.to_string(),
                tool_calls: vec![exchange.call.clone()],
                tool_call_id: Some(exchange.call.id.clone()),
                input_tokens: None,
                output_tokens: None,
                latency_ms: None,
                model: None,
                agent_name: None,
            })
            .await?;

            let mut sys = SystemFields::new(Uuid::now_v7());
            sys.tenant_id = tenant_id.clone();
            sys.user_id = user_id;
            stamp(&mut sys);
            self.insert_message(Message {
                sys,
                session_id: req.session_id,
                message_type: MessageType::ToolResponse,
                content: exchange.response.to_string(),
                tool_calls: Vec::new(),
                tool_call_id: Some(exchange.call.id.clone()),
                input_tokens: None,
                output_tokens: None,
                latency_ms: None,
                model: None,
                agent_name: None,
            })
            .await?;
        }

        // Assistant row with usage.
        let mut sys = SystemFields::new(assistant_message_id.as_uuid());
        sys.tenant_id = tenant_id.clone();
        sys.user_id = user_id;
        stamp(&mut sys);
        self.insert_message(Message {
            sys,
            session_id: req.session_id,
            message_type: MessageType::Assistant,
            content: req.assistant_content.clone(),
            tool_calls: req.tool_exchanges.iter().map(|e| e.call.clone()).collect(),
            tool_call_id: None,
            input_tokens: req.usage.input_tokens,
            output_tokens: req.usage.output_tokens,
            latency_ms: req.usage.latency_ms,
            model: req.usage.model.clone(),
            agent_name: req.usage.agent_name.clone(),
        })
        .await?;

        // Session accounting at ~chars/4.
        let turn_tokens =
            estimate_tokens(&req.user_content) + estimate_tokens(&req.assistant_content);
        let row = self
            .store
            .db()
            .query_one(
                "UPDATE sessions SET total_tokens = total_tokens + $2, updated_at = now() \
                 WHERE id = $1 RETURNING total_tokens",
                &[&req.session_id.as_uuid(), &turn_tokens],
            )
            .await
            .map_err(MemoryError::Store)?;
        let session_total_tokens: i64 = row.get(0);

        // Compaction: when enough tokens are uncovered, fold them into a
        // session_chunk moment. Deterministic ids make this safe to retry.
        let mut moment_built = None;
        if self.config.moment_threshold > 0 {
            let uncovered = tokens_since_last_moment(&self.store, req.session_id).await?;
            if uncovered >= self.config.moment_threshold {
                moment_built =
                    build_session_moment(&self.store, req.session_id, self.config.moment_threshold)
                        .await?
                        .map(|m| m.name);
            }
        }

        tracing::info!(
            session_id = %req.session_id,
            tokens = turn_tokens,
            tools = req.tool_exchanges.len(),
            moment = moment_built.as_deref().unwrap_or(""),
            "turn persisted"
        );

        Ok(TurnReceipt {
            user_message_id,
            assistant_message_id,
            session_total_tokens,
            moment_built,
        })
    }

    async fn insert_message(&self, message: Message) -> Result<Message, MemoryError> {
        let record = record_from("messages", &message)?;
        let stored = self
            .store
            .upsert("messages", record, WriteOptions { chat_path: true })
            .await?;
        Ok(record_into("messages", stored)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_usage_defaults_are_empty() {
        let usage = TurnUsage::default();
        assert!(usage.input_tokens.is_none());
        assert!(usage.model.is_none());
    }

    #[test]
    fn missing_ids_are_generated_fresh() {
        let ids = TurnIds::default();
        assert!(ids.user_message_id.is_none());
        let generated = ids.user_message_id.unwrap_or_else(MessageId::now_v7);
        assert_ne!(generated.as_uuid(), Uuid::nil());
    }
}
