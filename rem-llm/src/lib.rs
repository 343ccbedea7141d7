//! REM LLM - provider traits and stream events
//!
//! Two seams: `EmbeddingProvider` feeds the embedding pipeline,
//! `ChatProvider` drives agent turns. The default implementation speaks the
//! OpenAI-compatible HTTP API; everything above these traits is
//! provider-agnostic.

mod openai;

pub use openai::*;

use async_trait::async_trait;
use rem_core::{LlmError, ToolCall};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Embedding generation.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;

    /// Batch variant; the result order matches the input order.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, LlmError>;

    /// Vector dimension; embedding tables are typed to this.
    fn dimensions(&self) -> i32;

    /// Recorded on embedding rows as `provider`.
    fn model_id(&self) -> &str;
}

/// One message sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A tool offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: JsonValue,
}

/// Per-request limits, from the agent's `limits` block.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChatLimits {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: i64,
    /// Wall-clock deadline for the whole stream, seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_max_tokens() -> i64 {
    4096
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for ChatLimits {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            timeout_secs: 120,
        }
    }
}

/// One chat invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
    /// When set, the model must return a JSON object matching this schema.
    pub output_schema: Option<JsonValue>,
    pub temperature: Option<f64>,
    #[serde(default)]
    pub limits: ChatLimits,
}

/// Events emitted while a chat streams.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Incremental assistant text.
    Delta(String),
    /// A fully assembled tool call.
    ToolCall(ToolCall),
    /// Terminal event with usage totals.
    Done {
        input_tokens: Option<i64>,
        output_tokens: Option<i64>,
    },
    /// Terminal error; no further events follow.
    Error(String),
}

pub type ChatStream = tokio::sync::mpsc::Receiver<StreamEvent>;

/// Streaming chat.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream, LlmError>;
}

/// A fully drained chat turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatOutcome {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
}

/// Drain a stream into one outcome. Convenience for callers that do not
/// forward events.
pub async fn collect_stream(mut stream: ChatStream) -> Result<ChatOutcome, LlmError> {
    let mut outcome = ChatOutcome::default();
    while let Some(event) = stream.recv().await {
        match event {
            StreamEvent::Delta(text) => outcome.text.push_str(&text),
            StreamEvent::ToolCall(call) => outcome.tool_calls.push(call),
            StreamEvent::Done {
                input_tokens,
                output_tokens,
            } => {
                outcome.input_tokens = input_tokens;
                outcome.output_tokens = output_tokens;
            }
            StreamEvent::Error(reason) => return Err(LlmError::StreamAborted { reason }),
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collect_stream_assembles_the_turn() {
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        tx.send(StreamEvent::Delta("Hello ".into())).await.unwrap();
        tx.send(StreamEvent::Delta("world".into())).await.unwrap();
        tx.send(StreamEvent::Done {
            input_tokens: Some(10),
            output_tokens: Some(2),
        })
        .await
        .unwrap();
        drop(tx);

        let outcome = collect_stream(rx).await.unwrap();
        assert_eq!(outcome.text, "Hello world");
        assert_eq!(outcome.output_tokens, Some(2));
    }

    #[tokio::test]
    async fn collect_stream_surfaces_errors() {
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        tx.send(StreamEvent::Error("connection reset".into()))
            .await
            .unwrap();
        drop(tx);

        let err = collect_stream(rx).await.unwrap_err();
        assert!(matches!(err, LlmError::StreamAborted { .. }));
    }
}
