//! Prompt assembly
//!
//! Three layers on every call: the agent's system prompt (with `## Tool
//! Notes` and, in conversational mode, `## Thinking Structure`), the runtime
//! instructions (date/time, ids, extra sections — never persisted), and the
//! replayed history minus tool plumbing.

use crate::AgentSchema;
use rem_core::{MessageType, SessionId, Timestamp};
use rem_llm::{ChatMessage, ChatRole};
use rem_memory::ContextMessage;
use uuid::Uuid;

/// Runtime context woven into the instructions block.
#[derive(Debug, Clone, Default)]
pub struct RuntimeContext {
    pub now: Option<Timestamp>,
    pub user_id: Option<Uuid>,
    pub session_id: Option<SessionId>,
    /// Extra named sections, e.g. from request headers.
    pub extra_sections: Vec<(String, String)>,
}

/// Build the system prompt for one call.
pub fn system_prompt(agent: &AgentSchema) -> String {
    let mut prompt = agent.description.clone();

    if !agent.tools.is_empty() {
        prompt.push_str("\n\n## Tool Notes\n");
        for tool in &agent.tools {
            match &tool.description {
                Some(note) => prompt.push_str(&format!("- {}: {}\n", tool.name, note)),
                None => prompt.push_str(&format!("- {}\n", tool.name)),
            }
        }
    }

    // Thinking aides only guide conversational output; structured mode
    // carries the properties in the response schema instead.
    if !agent.structured_output && !agent.properties.is_empty() {
        prompt.push_str("\n\n## Thinking Structure\n");
        for (name, spec) in &agent.properties {
            match spec.get("description").and_then(|v| v.as_str()) {
                Some(desc) => prompt.push_str(&format!("- {name}: {desc}\n")),
                None => prompt.push_str(&format!("- {name}\n")),
            }
        }
    }

    prompt
}

/// Build the instructions block. Rendered per call and never persisted.
pub fn instructions(agent: &AgentSchema, ctx: &RuntimeContext) -> String {
    let mut out = String::new();
    let now = ctx.now.unwrap_or_else(chrono::Utc::now);
    out.push_str(&format!("Current time: {}\n", now.to_rfc3339()));
    out.push_str(&format!("Agent: {}\n", agent.name));
    if let Some(user) = ctx.user_id {
        out.push_str(&format!("User: {user}\n"));
    }
    if let Some(session) = ctx.session_id {
        out.push_str(&format!("Session: {session}\n"));
    }
    for (title, body) in &ctx.extra_sections {
        out.push_str(&format!("\n## {title}\n{body}\n"));
    }
    out
}

/// Assemble the full message list for the model.
pub fn assemble(
    agent: &AgentSchema,
    ctx: &RuntimeContext,
    history: &[ContextMessage],
    user_input: &str,
) -> Vec<ChatMessage> {
    let mut messages = vec![
        ChatMessage::system(system_prompt(agent)),
        ChatMessage::system(instructions(agent, ctx)),
    ];

    for entry in history {
        let role = match entry.message_type {
            MessageType::Assistant => ChatRole::Assistant,
            MessageType::System | MessageType::Memory | MessageType::Observation => {
                ChatRole::System
            }
            // Tool rows are filtered upstream; anything else replays as the
            // user's voice.
            _ => ChatRole::User,
        };
        messages.push(ChatMessage {
            role,
            content: entry.content.clone(),
        });
    }

    messages.push(ChatMessage::user(user_input));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn agent(structured: bool) -> AgentSchema {
        AgentSchema::from_row(
            "helper",
            Some("You are the helper."),
            Some(&json!({
                "structured_output": structured,
                "properties": {"plan": {"type": "string", "description": "what to do next"}},
                "tools": [{"name": "search", "description": "query memory"}],
            })),
        )
        .unwrap()
    }

    #[test]
    fn conversational_prompts_carry_thinking_structure() {
        let prompt = system_prompt(&agent(false));
        assert!(prompt.contains("## Tool Notes"));
        assert!(prompt.contains("- search: query memory"));
        assert!(prompt.contains("## Thinking Structure"));
        assert!(prompt.contains("- plan: what to do next"));
    }

    #[test]
    fn structured_prompts_omit_thinking_structure() {
        let prompt = system_prompt(&agent(true));
        assert!(prompt.contains("## Tool Notes"));
        assert!(!prompt.contains("## Thinking Structure"));
    }

    #[test]
    fn assembly_orders_system_instructions_history_input() {
        let history = vec![
            ContextMessage {
                message_type: MessageType::System,
                content: "[Moment m-1] earlier summary".to_string(),
            },
            ContextMessage {
                message_type: MessageType::User,
                content: "earlier question".to_string(),
            },
            ContextMessage {
                message_type: MessageType::Assistant,
                content: "earlier answer".to_string(),
            },
        ];
        let messages = assemble(&agent(false), &RuntimeContext::default(), &history, "now?");
        assert_eq!(messages.len(), 6);
        assert_eq!(messages[0].role, ChatRole::System);
        assert_eq!(messages[1].role, ChatRole::System);
        assert_eq!(messages[2].content, "[Moment m-1] earlier summary");
        assert_eq!(messages[4].role, ChatRole::Assistant);
        assert_eq!(messages[5].content, "now?");
    }

    #[test]
    fn extra_sections_render_as_headed_blocks() {
        let ctx = RuntimeContext {
            extra_sections: vec![("Device".to_string(), "mobile".to_string())],
            ..Default::default()
        };
        let block = instructions(&agent(false), &ctx);
        assert!(block.contains("## Device\nmobile"));
    }
}
