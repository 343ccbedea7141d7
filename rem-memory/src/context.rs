//! Token-budgeted context loading
//!
//! History replays newest-first into a budget, always keeping the last N
//! messages, skipping tool plumbing rows, prepending recent chunk moments as
//! system rows, and collapsing covered out-of-window assistant messages into
//! LOOKUP breadcrumbs.

use crate::{covers_until, messages_since};
use rem_core::{
    estimate_tokens, normalise_key, truncate_chars, ContextConfig, EntityIdType, MemoryError,
    Message, MessageType, Moment, SessionId,
};
use rem_store::{record_into, EntityStore};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};

/// Breadcrumb hint cap.
const BREADCRUMB_HINT_CHARS: usize = 200;
/// Chunk moments prepended as temporal grounding.
const GROUNDING_MOMENTS: usize = 3;

/// One replayed context row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub message_type: MessageType,
    pub content: String,
}

/// Index of the first message inside the live window.
///
/// Walk newest-first accumulating tokens; the last `last_n` messages are
/// always in, older ones join until the budget would be exceeded.
pub fn live_window_start(token_counts: &[i64], budget: i64, last_n: usize) -> usize {
    let mut spent = 0i64;
    let mut start = token_counts.len();
    for (taken, (index, tokens)) in token_counts.iter().enumerate().rev().enumerate() {
        if taken < last_n {
            spent += tokens;
            start = index;
            continue;
        }
        if spent + tokens > budget {
            break;
        }
        spent += tokens;
        start = index;
    }
    start
}

/// Render a compaction breadcrumb.
pub fn breadcrumb(content: &str, moment_key: &str) -> String {
    format!(
        "[Earlier: {} → LOOKUP {}]",
        truncate_chars(content, BREADCRUMB_HINT_CHARS),
        moment_key
    )
}

/// Load the replay context for a session.
pub async fn load_context(
    store: &EntityStore,
    session_id: SessionId,
    config: &ContextConfig,
) -> Result<Vec<ContextMessage>, MemoryError> {
    let all = messages_since(store, session_id, None).await?;

    // Tool plumbing never replays; the assistant text already reflects tool
    // results.
    let replayable: Vec<&Message> = all
        .iter()
        .filter(|m| !m.message_type.is_tool_row())
        .collect();

    let token_counts: Vec<i64> = replayable
        .iter()
        .map(|m| estimate_tokens(&m.content))
        .collect();
    let start = live_window_start(
        &token_counts,
        config.token_budget,
        config.always_include_last,
    );

    let chunks = session_chunks(store, session_id).await?;

    let mut out = Vec::new();

    // Temporal grounding: the most recent chunk moments as system rows.
    for chunk in chunks.iter().rev().take(GROUNDING_MOMENTS).rev() {
        if let Some(summary) = &chunk.summary {
            out.push(ContextMessage {
                message_type: MessageType::System,
                content: format!("[Moment {}] {}", normalise_key(&chunk.name), summary),
            });
        }
    }

    // Out-of-window assistant messages covered by a moment become
    // breadcrumbs; uncovered ones are simply dropped.
    for message in &replayable[..start] {
        if message.message_type != MessageType::Assistant {
            continue;
        }
        if let Some(chunk) = covering_chunk(&chunks, message) {
            out.push(ContextMessage {
                message_type: MessageType::Assistant,
                content: breadcrumb(&message.content, &normalise_key(&chunk.name)),
            });
        }
    }

    // The live window, oldest first.
    for message in &replayable[start..] {
        out.push(ContextMessage {
            message_type: message.message_type,
            content: message.content.clone(),
        });
    }

    Ok(out)
}

/// All chunk moments for a session in chain order.
async fn session_chunks(
    store: &EntityStore,
    session_id: SessionId,
) -> Result<Vec<Moment>, MemoryError> {
    // Cheap path: most sessions have few chunks; one indexed find suffices.
    let mut filters = Map::new();
    filters.insert("session_id".into(), json!(session_id.as_uuid()));
    filters.insert("moment_type".into(), json!("session_chunk"));
    let records = store.find("moments", &filters, 100).await?;
    let mut chunks: Vec<Moment> = records
        .into_iter()
        .map(|r| record_into("moments", r))
        .collect::<Result<_, _>>()?;
    chunks.sort_by_key(|m| {
        m.sys
            .metadata
            .get("chunk_index")
            .and_then(|v| v.as_i64())
            .unwrap_or(0)
    });
    Ok(chunks)
}

/// The earliest chunk whose coverage includes the message.
fn covering_chunk<'a>(chunks: &'a [Moment], message: &Message) -> Option<&'a Moment> {
    chunks
        .iter()
        .find(|c| covers_until(c).map(|t| message.sys.created_at <= t).unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_respects_budget_newest_first() {
        // Four messages of 10 tokens; budget 25, last 1 always in.
        let counts = vec![10, 10, 10, 10];
        let start = live_window_start(&counts, 25, 1);
        // Newest (10) always in, then 10+10=20 <= 25, next would exceed.
        assert_eq!(start, 2);
    }

    #[test]
    fn last_n_overrides_budget() {
        let counts = vec![100, 100, 100];
        let start = live_window_start(&counts, 50, 2);
        assert_eq!(start, 1);
    }

    #[test]
    fn empty_history_yields_empty_window() {
        assert_eq!(live_window_start(&[], 1000, 4), 0);
    }

    #[test]
    fn window_takes_everything_under_budget() {
        let counts = vec![5, 5, 5];
        assert_eq!(live_window_start(&counts, 1000, 1), 0);
    }

    #[test]
    fn breadcrumb_truncates_long_hints() {
        let long = "x".repeat(500);
        let crumb = breadcrumb(&long, "session-abc-20260801-chunk-0");
        assert!(crumb.starts_with("[Earlier: "));
        assert!(crumb.contains('…'));
        assert!(crumb.ends_with("→ LOOKUP session-abc-20260801-chunk-0]"));
        assert!(crumb.len() < 500);
    }

    #[test]
    fn breadcrumb_keeps_short_hints_verbatim() {
        let crumb = breadcrumb("short answer", "key-1");
        assert_eq!(crumb, "[Earlier: short answer → LOOKUP key-1]");
    }
}
