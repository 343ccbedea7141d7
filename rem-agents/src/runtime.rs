//! Agent runtime
//!
//! Turns a declarative agent row into one live turn: assemble the prompt,
//! stream the model, execute tool calls (with `ask_agent` delegation),
//! enforce structured output, invoke the chained tool, and persist the turn
//! on the session.

use crate::{assemble, AgentCache, AgentSchema, RuntimeContext, ToolRegistry};
use rem_core::{AgentError, SessionId, ToolCall};
use rem_llm::{collect_stream, ChatProvider, ChatRequest, ChatMessage, StreamEvent, ToolSpec};
use rem_memory::{load_context, MemoryService, ToolExchange, TurnIds, TurnRequest, TurnUsage};
use serde_json::{json, Map, Value as JsonValue};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Rounds of tool execution before the turn is forced to conclude.
const MAX_TOOL_ROUNDS: usize = 4;
/// Bound on the delegation event queue; a slow parent backpressures the
/// child instead of buffering unboundedly.
const EVENT_QUEUE_DEPTH: usize = 64;

/// Events forwarded to a caller that watches the turn live. Child events
/// interleave with the parent's in FIFO order on one queue.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    Delta(String),
    ToolStarted { id: String, name: String },
    ToolCompleted { id: String, name: String },
    ChildDelta { agent: String, text: String },
    Done,
}

/// Options for one run.
#[derive(Clone, Default)]
pub struct AgentRunOptions {
    pub session_id: Option<SessionId>,
    pub tenant_id: Option<String>,
    pub user_id: Option<Uuid>,
    pub extra_sections: Vec<(String, String)>,
    /// Live event sink; `None` runs silently.
    pub events: Option<mpsc::Sender<AgentEvent>>,
}

/// What one turn produced.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub text: String,
    /// Present under structured output, validated against the declared
    /// properties.
    pub structured: Option<JsonValue>,
    pub tool_exchanges: Vec<ToolExchange>,
    pub usage: TurnUsage,
}

pub struct AgentRuntime {
    memory: Arc<MemoryService>,
    chat: Arc<dyn ChatProvider>,
    cache: Arc<AgentCache>,
    tools: ToolRegistry,
}

impl AgentRuntime {
    pub fn new(
        memory: Arc<MemoryService>,
        chat: Arc<dyn ChatProvider>,
        cache: Arc<AgentCache>,
        tools: ToolRegistry,
    ) -> Self {
        Self {
            memory,
            chat,
            cache,
            tools,
        }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Run one turn of the named agent.
    pub async fn run(
        &self,
        agent_name: &str,
        input: &str,
        opts: AgentRunOptions,
    ) -> Result<AgentOutcome, AgentError> {
        let agent = self.cache.load(agent_name, opts.user_id).await?;
        let mut outcome = self.drive(&agent, input, &opts).await?;

        // Chained tool: fed the structured object directly, same process.
        if let (Some(structured), Some(chained)) =
            (outcome.structured.clone(), agent.chained_tool.as_deref())
        {
            match self.tools.get(chained) {
                None => {
                    tracing::warn!(agent = %agent.name, tool = chained, "chained tool not registered; returning original output");
                }
                Some(tool) => {
                    let call = ToolCall {
                        id: format!("chained-{}", Uuid::now_v7()),
                        name: chained.to_string(),
                        arguments: structured.clone(),
                    };
                    let response = match tool.invoke(&structured).await {
                        Ok(result) => result,
                        Err(e) => {
                            tracing::error!(agent = %agent.name, tool = chained, error = %e, "chained tool failed; returning original output");
                            json!({"error": e.to_string()})
                        }
                    };
                    outcome.tool_exchanges.push(ToolExchange { call, response });
                }
            }
        }

        // Persist the delegation/tool artifacts and the turn itself.
        if let Some(session_id) = opts.session_id {
            self.memory
                .persist_turn(TurnRequest {
                    session_id,
                    tenant_id: opts.tenant_id.clone(),
                    user_id: opts.user_id,
                    user_content: input.to_string(),
                    assistant_content: outcome.text.clone(),
                    tool_exchanges: outcome.tool_exchanges.clone(),
                    usage: outcome.usage.clone(),
                    ids: TurnIds::default(),
                })
                .await
                .map_err(|e| AgentError::Store(match e {
                    rem_core::MemoryError::Store(s) => s,
                    other => rem_core::StoreError::Database(other.to_string()),
                }))?;
        }

        if let Some(events) = &opts.events {
            let _ = events.send(AgentEvent::Done).await;
        }
        Ok(outcome)
    }

    /// The model loop: stream, execute tools, feed observations back, stop
    /// when a round produces no tool calls.
    async fn drive(
        &self,
        agent: &AgentSchema,
        input: &str,
        opts: &AgentRunOptions,
    ) -> Result<AgentOutcome, AgentError> {
        let history = match opts.session_id {
            Some(session_id) => load_context(
                self.memory.store(),
                session_id,
                self.memory.config(),
            )
            .await
            .map_err(|e| AgentError::Store(match e {
                rem_core::MemoryError::Store(s) => s,
                other => rem_core::StoreError::Database(other.to_string()),
            }))?,
            None => Vec::new(),
        };

        let ctx = RuntimeContext {
            now: None,
            user_id: opts.user_id,
            session_id: opts.session_id,
            extra_sections: opts.extra_sections.clone(),
        };
        let mut messages = assemble(agent, &ctx, &history, input);
        let tool_specs = self.tool_specs(agent).await?;

        let mut exchanges: Vec<ToolExchange> = Vec::new();
        let mut usage = TurnUsage {
            model: Some(agent.model.clone()),
            agent_name: Some(agent.name.clone()),
            ..TurnUsage::default()
        };
        let mut final_text = String::new();

        for round in 0..MAX_TOOL_ROUNDS {
            let request = ChatRequest {
                model: agent.model.clone(),
                messages: messages.clone(),
                tools: tool_specs.clone(),
                output_schema: agent.structured_output.then(|| agent.output_schema()),
                temperature: agent.temperature,
                limits: agent.limits,
            };

            let turn = match &opts.events {
                Some(events) => self.stream_with_events(request, events).await?,
                None => collect_stream(self.chat.chat_stream(request).await?).await?,
            };

            usage.input_tokens = add(usage.input_tokens, turn.input_tokens);
            usage.output_tokens = add(usage.output_tokens, turn.output_tokens);
            final_text = turn.text.clone();

            if turn.tool_calls.is_empty() {
                break;
            }
            if round + 1 == MAX_TOOL_ROUNDS {
                tracing::warn!(agent = %agent.name, "tool round limit reached; concluding turn");
                break;
            }

            if !turn.text.is_empty() {
                messages.push(ChatMessage::assistant(turn.text.clone()));
            }
            for call in turn.tool_calls {
                if let Some(events) = &opts.events {
                    let _ = events
                        .send(AgentEvent::ToolStarted {
                            id: call.id.clone(),
                            name: call.name.clone(),
                        })
                        .await;
                }
                let response = self.execute_tool(&call, opts).await;
                if let Some(events) = &opts.events {
                    let _ = events
                        .send(AgentEvent::ToolCompleted {
                            id: call.id.clone(),
                            name: call.name.clone(),
                        })
                        .await;
                }
                messages.push(ChatMessage::user(format!(
                    "[Tool {} result] {}",
                    call.name, response
                )));
                exchanges.push(ToolExchange { call, response });
            }
        }

        let structured = if agent.structured_output {
            let parsed: JsonValue =
                serde_json::from_str(final_text.trim()).map_err(|e| AgentError::OutputMismatch {
                    reason: format!("response is not valid JSON: {e}"),
                })?;
            agent.validate_output(&parsed)?;
            Some(parsed)
        } else {
            None
        };

        Ok(AgentOutcome {
            text: final_text,
            structured,
            tool_exchanges: exchanges,
            usage,
        })
    }

    /// Forward stream deltas while collecting the turn.
    async fn stream_with_events(
        &self,
        request: ChatRequest,
        events: &mpsc::Sender<AgentEvent>,
    ) -> Result<rem_llm::ChatOutcome, AgentError> {
        let mut stream = self.chat.chat_stream(request).await?;
        let mut outcome = rem_llm::ChatOutcome::default();
        while let Some(event) = stream.recv().await {
            match event {
                StreamEvent::Delta(text) => {
                    let _ = events.send(AgentEvent::Delta(text.clone())).await;
                    outcome.text.push_str(&text);
                }
                StreamEvent::ToolCall(call) => outcome.tool_calls.push(call),
                StreamEvent::Done {
                    input_tokens,
                    output_tokens,
                } => {
                    outcome.input_tokens = input_tokens;
                    outcome.output_tokens = output_tokens;
                }
                StreamEvent::Error(reason) => {
                    return Err(rem_core::LlmError::StreamAborted { reason }.into())
                }
            }
        }
        Ok(outcome)
    }

    /// Tool specs offered to the model: registry tools first, then remote
    /// registrations from the `tools` table, then `ask_agent`.
    async fn tool_specs(&self, agent: &AgentSchema) -> Result<Vec<ToolSpec>, AgentError> {
        let mut specs = Vec::new();
        for tool_ref in &agent.tools {
            if let Some(executor) = self.tools.get(&tool_ref.name) {
                specs.push(ToolSpec {
                    name: tool_ref.name.clone(),
                    description: tool_ref
                        .description
                        .clone()
                        .or_else(|| executor.description().map(str::to_string)),
                    input_schema: executor.input_schema(),
                });
                continue;
            }

            let mut filters = Map::new();
            filters.insert("name".into(), json!(tool_ref.name));
            let record = self
                .memory
                .store()
                .find("tools", &filters, 1)
                .await?
                .into_iter()
                .next();
            specs.push(ToolSpec {
                name: tool_ref.name.clone(),
                description: tool_ref.description.clone().or_else(|| {
                    record
                        .as_ref()
                        .and_then(|r| r.str_field("description").map(str::to_string))
                }),
                input_schema: record
                    .as_ref()
                    .and_then(|r| r.fields.get("input_schema").cloned())
                    .unwrap_or_else(|| json!({"type": "object"})),
            });
        }

        specs.push(ToolSpec {
            name: "ask_agent".to_string(),
            description: Some("Delegate a sub-task to another agent by name.".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "input": {"type": "string"},
                },
                "required": ["name", "input"],
            }),
        });
        Ok(specs)
    }

    /// Execute one tool call. Tool errors become error payloads in the
    /// response row rather than failing the turn.
    async fn execute_tool(&self, call: &ToolCall, opts: &AgentRunOptions) -> JsonValue {
        if call.name == "ask_agent" {
            return self.delegate(call, opts).await;
        }
        match self.tools.get(&call.name) {
            Some(tool) => match tool.invoke(&call.arguments).await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(tool = %call.name, error = %e, "tool execution failed");
                    json!({"error": e.to_string()})
                }
            },
            None => {
                tracing::warn!(tool = %call.name, "tool is not executable in this process");
                json!({"error": format!("tool '{}' is not available", call.name)})
            }
        }
    }

    /// `ask_agent`: run the child and interleave its streaming events with
    /// the parent's through a bounded queue. The child's turn is not
    /// persisted; the delegation artifact lands as the parent's tool rows.
    async fn delegate(&self, call: &ToolCall, opts: &AgentRunOptions) -> JsonValue {
        let Some(child_name) = call.arguments.get("name").and_then(|v| v.as_str()) else {
            return json!({"error": "ask_agent requires a 'name' argument"});
        };
        let Some(child_input) = call.arguments.get("input").and_then(|v| v.as_str()) else {
            return json!({"error": "ask_agent requires an 'input' argument"});
        };

        let (child_tx, mut child_rx) = mpsc::channel::<AgentEvent>(EVENT_QUEUE_DEPTH);
        let forward = opts.events.clone();
        let child_label = child_name.to_string();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = child_rx.recv().await {
                if let (Some(parent), AgentEvent::Delta(text)) = (&forward, &event) {
                    let _ = parent
                        .send(AgentEvent::ChildDelta {
                            agent: child_label.clone(),
                            text: text.clone(),
                        })
                        .await;
                }
            }
        });

        let child_opts = AgentRunOptions {
            session_id: None,
            tenant_id: opts.tenant_id.clone(),
            user_id: opts.user_id,
            extra_sections: Vec::new(),
            events: Some(child_tx),
        };
        let result = self.run_boxed(child_name, child_input, child_opts).await;
        let _ = forwarder.await;

        match result {
            Ok(outcome) => json!({
                "agent": child_name,
                "output": outcome.structured.unwrap_or(JsonValue::String(outcome.text)),
            }),
            Err(e) => {
                tracing::error!(child = child_name, error = %e, "delegation failed");
                json!({"error": e.to_string()})
            }
        }
    }

    /// Boxed recursion point for delegation.
    fn run_boxed<'a>(
        &'a self,
        agent_name: &'a str,
        input: &'a str,
        opts: AgentRunOptions,
    ) -> Pin<Box<dyn Future<Output = Result<AgentOutcome, AgentError>> + Send + 'a>> {
        Box::pin(self.run(agent_name, input, opts))
    }
}

fn add(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a + b),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_addition_keeps_partial_counts() {
        assert_eq!(add(None, Some(3)), Some(3));
        assert_eq!(add(Some(2), None), Some(2));
        assert_eq!(add(Some(2), Some(3)), Some(5));
        assert_eq!(add(None, None), None);
    }
}
