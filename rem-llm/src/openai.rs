//! OpenAI-compatible provider
//!
//! Speaks `/embeddings` and `/chat/completions` against any endpoint
//! implementing the OpenAI wire format. Chat responses stream as SSE; tool
//! call fragments are assembled before they are emitted as events.

use crate::{
    ChatMessage, ChatProvider, ChatRequest, ChatRole, ChatStream, EmbeddingProvider, StreamEvent,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use rem_core::{LlmError, ToolCall};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeMap;
use std::time::Duration;

/// Shared HTTP client for one endpoint.
#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Environment variables:
    /// - `P8_LLM_BASE_URL` (default: https://api.openai.com/v1)
    /// - `P8_LLM_API_KEY`
    pub fn from_env() -> Self {
        Self::new(
            std::env::var("P8_LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            std::env::var("P8_LLM_API_KEY").unwrap_or_default(),
        )
    }

    async fn post(&self, path: &str, body: &JsonValue) -> Result<reqwest::Response, LlmError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: "openai".to_string(),
                status: 0,
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::RequestFailed {
                provider: "openai".to_string(),
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }
}

// ============================================================================
// EMBEDDINGS
// ============================================================================

pub struct OpenAiEmbedding {
    client: OpenAiClient,
    model: String,
    dimensions: i32,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

impl OpenAiEmbedding {
    pub fn new(client: OpenAiClient, model: impl Into<String>, dimensions: i32) -> Self {
        Self {
            client,
            model: model.into(),
            dimensions,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let vectors = self.embed_batch(&[text]).await?;
        vectors.into_iter().next().ok_or_else(|| LlmError::InvalidResponse {
            provider: "openai".to_string(),
            reason: "no embedding data in response".to_string(),
        })
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, LlmError> {
        let body = json!({
            "model": self.model,
            "input": texts,
            "dimensions": self.dimensions,
        });
        let response = self.client.post("embeddings", &body).await?;
        let parsed: EmbeddingResponse =
            response.json().await.map_err(|e| LlmError::InvalidResponse {
                provider: "openai".to_string(),
                reason: e.to_string(),
            })?;

        if parsed.data.len() != texts.len() {
            return Err(LlmError::InvalidResponse {
                provider: "openai".to_string(),
                reason: format!(
                    "expected {} embeddings but got {}",
                    texts.len(),
                    parsed.data.len()
                ),
            });
        }
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimensions(&self) -> i32 {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// CHAT
// ============================================================================

pub struct OpenAiChat {
    client: OpenAiClient,
}

impl OpenAiChat {
    pub fn new(client: OpenAiClient) -> Self {
        Self { client }
    }

    fn request_body(request: &ChatRequest) -> JsonValue {
        let messages: Vec<JsonValue> = request
            .messages
            .iter()
            .map(|m| {
                json!({
                    "role": match m.role {
                        ChatRole::System => "system",
                        ChatRole::User => "user",
                        ChatRole::Assistant => "assistant",
                    },
                    "content": m.content,
                })
            })
            .collect();

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "stream": true,
            "stream_options": {"include_usage": true},
            "max_tokens": request.limits.max_tokens,
        });

        if let Some(t) = request.temperature {
            body["temperature"] = json!(t);
        }
        if !request.tools.is_empty() {
            body["tools"] = JsonValue::Array(
                request
                    .tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.input_schema,
                            }
                        })
                    })
                    .collect(),
            );
        }
        if let Some(schema) = &request.output_schema {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {"name": "structured_output", "schema": schema},
            });
        }
        body
    }
}

/// Partial tool call assembled from stream fragments.
#[derive(Default)]
struct ToolCallDraft {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallDraft {
    fn finish(self) -> Option<ToolCall> {
        if self.name.is_empty() {
            return None;
        }
        let arguments = serde_json::from_str(&self.arguments)
            .unwrap_or(JsonValue::String(self.arguments.clone()));
        Some(ToolCall {
            id: self.id,
            name: self.name,
            arguments,
        })
    }
}

#[async_trait]
impl ChatProvider for OpenAiChat {
    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream, LlmError> {
        let deadline = Duration::from_secs(request.limits.timeout_secs);
        let body = Self::request_body(&request);
        let response = self.client.post("chat/completions", &body).await?;

        let (tx, rx) = tokio::sync::mpsc::channel::<StreamEvent>(64);
        tokio::spawn(async move {
            let result = tokio::time::timeout(deadline, pump_sse(response, &tx)).await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(reason)) => {
                    let _ = tx.send(StreamEvent::Error(reason)).await;
                }
                Err(_) => {
                    let _ = tx
                        .send(StreamEvent::Error("chat stream deadline exceeded".to_string()))
                        .await;
                }
            }
        });
        Ok(rx)
    }
}

/// Read SSE chunks, forwarding deltas and assembling tool calls. Returns
/// after `[DONE]` or when the receiver goes away (client disconnect).
async fn pump_sse(
    response: reqwest::Response,
    tx: &tokio::sync::mpsc::Sender<StreamEvent>,
) -> Result<(), String> {
    let mut stream = response.bytes_stream();
    let mut buffer = String::new();
    let mut drafts: BTreeMap<i64, ToolCallDraft> = BTreeMap::new();
    let mut usage: (Option<i64>, Option<i64>) = (None, None);

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| format!("stream read failed: {e}"))?;
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(pos) = buffer.find('\n') {
            let line = buffer[..pos].trim().to_string();
            buffer.drain(..=pos);

            let Some(data) = line.strip_prefix("data:").map(str::trim) else {
                continue;
            };
            if data == "[DONE]" {
                for (_, draft) in std::mem::take(&mut drafts) {
                    if let Some(call) = draft.finish() {
                        if tx.send(StreamEvent::ToolCall(call)).await.is_err() {
                            return Ok(());
                        }
                    }
                }
                let _ = tx
                    .send(StreamEvent::Done {
                        input_tokens: usage.0,
                        output_tokens: usage.1,
                    })
                    .await;
                return Ok(());
            }

            let parsed: JsonValue = match serde_json::from_str(data) {
                Ok(v) => v,
                Err(_) => continue,
            };

            if let Some(u) = parsed.get("usage").filter(|u| !u.is_null()) {
                usage.0 = u.get("prompt_tokens").and_then(|v| v.as_i64());
                usage.1 = u.get("completion_tokens").and_then(|v| v.as_i64());
            }

            let Some(delta) = parsed
                .get("choices")
                .and_then(|c| c.get(0))
                .and_then(|c| c.get("delta"))
            else {
                continue;
            };

            if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
                if !text.is_empty()
                    && tx.send(StreamEvent::Delta(text.to_string())).await.is_err()
                {
                    return Ok(());
                }
            }

            if let Some(calls) = delta.get("tool_calls").and_then(|v| v.as_array()) {
                for fragment in calls {
                    let index = fragment.get("index").and_then(|v| v.as_i64()).unwrap_or(0);
                    let draft = drafts.entry(index).or_default();
                    if let Some(id) = fragment.get("id").and_then(|v| v.as_str()) {
                        draft.id = id.to_string();
                    }
                    if let Some(function) = fragment.get("function") {
                        if let Some(name) = function.get("name").and_then(|v| v.as_str()) {
                            draft.name.push_str(name);
                        }
                        if let Some(args) = function.get("arguments").and_then(|v| v.as_str()) {
                            draft.arguments.push_str(args);
                        }
                    }
                }
            }
        }
    }

    // Stream ended without [DONE]; emit what we have.
    let _ = tx
        .send(StreamEvent::Done {
            input_tokens: usage.0,
            output_tokens: usage.1,
        })
        .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChatLimits;

    #[test]
    fn request_body_includes_tools_and_schema() {
        let request = ChatRequest {
            model: "gpt-4o-mini".to_string(),
            messages: vec![ChatMessage::user("hi")],
            tools: vec![crate::ToolSpec {
                name: "search".to_string(),
                description: Some("find things".to_string()),
                input_schema: json!({"type": "object"}),
            }],
            output_schema: Some(json!({"type": "object", "properties": {}})),
            temperature: Some(0.2),
            limits: ChatLimits::default(),
        };
        let body = OpenAiChat::request_body(&request);
        assert_eq!(body["stream"], true);
        assert_eq!(body["tools"][0]["function"]["name"], "search");
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["temperature"], 0.2);
    }

    #[test]
    fn tool_call_draft_parses_arguments() {
        let draft = ToolCallDraft {
            id: "call_1".to_string(),
            name: "search".to_string(),
            arguments: "{\"query\": \"kv\"}".to_string(),
        };
        let call = draft.finish().unwrap();
        assert_eq!(call.name, "search");
        assert_eq!(call.arguments["query"], "kv");
    }

    #[test]
    fn nameless_drafts_are_dropped() {
        assert!(ToolCallDraft::default().finish().is_none());
    }
}
