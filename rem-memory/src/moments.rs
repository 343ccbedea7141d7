//! Moment building and the temporal feed
//!
//! Session chunks form a linear chain per session, named
//! `session-<sha256(session_id)[:6]>-<YYYYMMDD>-chunk-<index>` with a
//! deterministic id, so rebuilding from identical history is idempotent.
//! Daily summaries are virtual rows synthesised per date; reminders are
//! future moments excluded from feed reads unless asked for.

use chrono::{Datelike, NaiveDate, Timelike, Utc};
use rem_core::{
    estimate_tokens, normalise_key, short_hash, truncate_chars, EntityIdType, MemoryError,
    Message, Moment, MomentId, MomentType, SessionId, SystemFields, Timestamp,
};
use rem_store::{record_from, record_into, EntityStore, WriteOptions};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Assistant-content summary cap inside a chunk moment.
const CHUNK_SUMMARY_CHARS: usize = 2000;
/// Session-metadata summary cap.
const LATEST_SUMMARY_CHARS: usize = 200;

/// The most recent `session_chunk` for a session, if any.
pub async fn last_session_chunk(
    store: &EntityStore,
    session_id: SessionId,
) -> Result<Option<Moment>, MemoryError> {
    let mut filters = Map::new();
    filters.insert("session_id".into(), json!(session_id.as_uuid()));
    filters.insert("moment_type".into(), json!("session_chunk"));
    let records = store.find("moments", &filters, 1).await?;
    records
        .into_iter()
        .next()
        .map(|r| record_into("moments", r).map_err(MemoryError::Store))
        .transpose()
}

/// Messages created after `after`, oldest first, decrypted where the server
/// may decrypt.
pub async fn messages_since(
    store: &EntityStore,
    session_id: SessionId,
    after: Option<Timestamp>,
) -> Result<Vec<Message>, MemoryError> {
    let mut filters = Map::new();
    filters.insert("session_id".into(), json!(session_id.as_uuid()));
    let records = store.find("messages", &filters, 1000).await?;

    let mut messages: Vec<Message> = Vec::with_capacity(records.len());
    for record in records {
        let message: Message = record_into("messages", record)?;
        if let Some(after) = after {
            if message.sys.created_at <= after {
                continue;
            }
        }
        messages.push(message);
    }
    messages.sort_by(|a, b| (a.sys.created_at, a.sys.id).cmp(&(b.sys.created_at, b.sys.id)));
    Ok(messages)
}

/// Estimated tokens not yet folded into a chunk moment.
pub async fn tokens_since_last_moment(
    store: &EntityStore,
    session_id: SessionId,
) -> Result<i64, MemoryError> {
    let after = last_session_chunk(store, session_id)
        .await?
        .and_then(|m| covers_until(&m));
    let messages = messages_since(store, session_id, after).await?;
    Ok(messages
        .iter()
        .map(|m| estimate_tokens(&m.content))
        .sum())
}

/// The timestamp up to which a chunk covers its session.
pub fn covers_until(moment: &Moment) -> Option<Timestamp> {
    moment
        .sys
        .metadata
        .get("covers_until")
        .and_then(|v| v.as_str())
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Chain position of a chunk.
fn chunk_index(moment: &Moment) -> i64 {
    moment
        .sys
        .metadata
        .get("chunk_index")
        .and_then(|v| v.as_i64())
        .unwrap_or(0)
}

/// Deterministic chunk name.
pub fn moment_chain_name(session_id: SessionId, date: NaiveDate, index: i64) -> String {
    format!(
        "session-{}-{}{:02}{:02}-chunk-{}",
        short_hash(&session_id.as_uuid().to_string(), 6),
        date.year(),
        date.month(),
        date.day(),
        index
    )
}

/// Build the next `session_chunk` for a session. Returns `None` when the
/// uncovered tokens fall short of the threshold. Retry-safe: identical
/// history produces the same name, id, and summary prefix.
pub async fn build_session_moment(
    store: &EntityStore,
    session_id: SessionId,
    threshold: i64,
) -> Result<Option<Moment>, MemoryError> {
    let previous = last_session_chunk(store, session_id).await?;
    let after = previous.as_ref().and_then(covers_until);
    let messages = messages_since(store, session_id, after).await?;
    if messages.is_empty() {
        return Ok(None);
    }

    let token_sum: i64 = messages.iter().map(|m| estimate_tokens(&m.content)).sum();
    if token_sum < threshold {
        return Ok(None);
    }

    let first_at = messages.first().map(|m| m.sys.created_at).unwrap_or_else(Utc::now);
    let last_at = messages.last().map(|m| m.sys.created_at).unwrap_or_else(Utc::now);
    let assistant_text: String = messages
        .iter()
        .filter(|m| m.message_type == rem_core::MessageType::Assistant)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let summary = truncate_chars(&assistant_text, CHUNK_SUMMARY_CHARS);

    let index = previous.as_ref().map(|p| chunk_index(p) + 1).unwrap_or(0);
    let name = moment_chain_name(session_id, last_at.date_naive(), index);
    let id = MomentId::deterministic(&name, None);

    let session = store.get_required("sessions", session_id.as_uuid()).await?;

    let mut sys = SystemFields::new(id.as_uuid());
    sys.tenant_id = session.sys.tenant_id.clone();
    sys.user_id = session.sys.user_id;
    sys.metadata = json!({
        "chunk_index": index,
        "covers_until": last_at.to_rfc3339(),
        "message_count": messages.len(),
        "token_sum": token_sum,
    });

    let moment = Moment {
        sys,
        name: name.clone(),
        moment_type: MomentType::SessionChunk,
        summary: Some(summary.clone()),
        starts_timestamp: Some(first_at),
        previous_moment_keys: previous
            .as_ref()
            .map(|p| vec![normalise_key(&p.name)])
            .unwrap_or_default(),
        session_id: Some(session_id),
    };
    let stored = store
        .upsert("moments", record_from("moments", &moment)?, WriteOptions::default())
        .await?;
    let stored: Moment = record_into("moments", stored)?;

    // Compaction breadcrumbs on the session row.
    let mut session = session;
    let mut meta = match session.sys.metadata {
        JsonValue::Object(map) => map,
        _ => Map::new(),
    };
    let moment_count = meta.get("moment_count").and_then(|v| v.as_i64()).unwrap_or(0) + 1;
    meta.insert("latest_moment_id".into(), json!(id.as_uuid()));
    meta.insert(
        "latest_summary".into(),
        json!(truncate_chars(&summary, LATEST_SUMMARY_CHARS)),
    );
    meta.insert("moment_count".into(), json!(moment_count));
    session.sys.metadata = JsonValue::Object(meta);
    store
        .upsert("sessions", session, WriteOptions::default())
        .await?;

    tracing::info!(session_id = %session_id, moment = %name, tokens = token_sum, "session chunk built");
    Ok(Some(stored))
}

// ============================================================================
// FEED
// ============================================================================

/// Feed read over moments. Future moments (reminders) are excluded unless
/// `include_future` is set.
pub async fn list_moments(
    store: &EntityStore,
    user_id: Uuid,
    from: Timestamp,
    to: Timestamp,
    include_future: bool,
) -> Result<Vec<Moment>, MemoryError> {
    let rows = store
        .db()
        .query(
            "SELECT id FROM moments \
             WHERE user_id = $1 AND deleted_at IS NULL \
               AND coalesce(starts_timestamp, created_at) >= $2 \
               AND coalesce(starts_timestamp, created_at) < $3 \
               AND ($4 OR starts_timestamp IS NULL OR starts_timestamp <= now()) \
             ORDER BY coalesce(starts_timestamp, created_at) DESC",
            &[&user_id, &from, &to, &include_future],
        )
        .await
        .map_err(MemoryError::Store)?;

    let mut moments = Vec::with_capacity(rows.len());
    for row in rows {
        let id: Uuid = row.get(0);
        if let Some(record) = store.get("moments", id).await? {
            moments.push(record_into("moments", record)?);
        }
    }
    Ok(moments)
}

/// A synthetic per-date feed row. Its id derives from `(user_id, date)` so
/// the client can open an idempotent "today chat".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub id: Uuid,
    pub user_id: Uuid,
    pub date: NaiveDate,
    pub message_count: i64,
    pub total_tokens: i64,
    pub session_count: i64,
    pub moment_count: i64,
    pub reminder_count: i64,
    pub resource_counts: BTreeMap<String, i64>,
    pub sessions: Vec<Uuid>,
}

/// Deterministic daily-summary id.
pub fn daily_summary_id(user_id: Uuid, date: NaiveDate) -> Uuid {
    MomentId::deterministic(&format!("daily-summary-{date}"), Some(user_id)).as_uuid()
}

/// Synthesise `daily_summary` rows for each date with activity in the
/// window (messages ∪ moments ∪ categorised resources).
pub async fn synthesize_daily_summaries(
    store: &EntityStore,
    user_id: Uuid,
    from: Timestamp,
    to: Timestamp,
) -> Result<Vec<DailySummary>, MemoryError> {
    let mut days: BTreeMap<NaiveDate, DailySummary> = BTreeMap::new();
    fn day_entry(
        days: &mut BTreeMap<NaiveDate, DailySummary>,
        user_id: Uuid,
        date: NaiveDate,
    ) -> &mut DailySummary {
        days.entry(date).or_insert_with(|| DailySummary {
            id: daily_summary_id(user_id, date),
            user_id,
            date,
            message_count: 0,
            total_tokens: 0,
            session_count: 0,
            moment_count: 0,
            reminder_count: 0,
            resource_counts: BTreeMap::new(),
            sessions: Vec::new(),
        })
    }

    let message_rows = store
        .db()
        .query(
            "SELECT (created_at AT TIME ZONE 'utc')::date, count(*), \
                    coalesce(sum(coalesce(input_tokens, 0) + coalesce(output_tokens, 0)), 0), \
                    array_agg(DISTINCT session_id) \
             FROM messages \
             WHERE user_id = $1 AND deleted_at IS NULL \
               AND created_at >= $2 AND created_at < $3 \
             GROUP BY 1",
            &[&user_id, &from, &to],
        )
        .await
        .map_err(MemoryError::Store)?;
    for row in message_rows {
        let date: NaiveDate = row.get(0);
        let entry = day_entry(&mut days, user_id, date);
        entry.message_count = row.get(1);
        entry.total_tokens = row.get(2);
        entry.sessions = row.get(3);
        entry.session_count = entry.sessions.len() as i64;
    }

    let moment_rows = store
        .db()
        .query(
            "SELECT (coalesce(starts_timestamp, created_at) AT TIME ZONE 'utc')::date, \
                    count(*), \
                    count(*) FILTER (WHERE moment_type = 'reminder') \
             FROM moments \
             WHERE user_id = $1 AND deleted_at IS NULL \
               AND coalesce(starts_timestamp, created_at) >= $2 \
               AND coalesce(starts_timestamp, created_at) < $3 \
             GROUP BY 1",
            &[&user_id, &from, &to],
        )
        .await
        .map_err(MemoryError::Store)?;
    for row in moment_rows {
        let date: NaiveDate = row.get(0);
        let entry = day_entry(&mut days, user_id, date);
        entry.moment_count = row.get(1);
        entry.reminder_count = row.get(2);
    }

    let resource_rows = store
        .db()
        .query(
            "SELECT (created_at AT TIME ZONE 'utc')::date, category, count(*) \
             FROM resources \
             WHERE user_id = $1 AND deleted_at IS NULL AND category IS NOT NULL \
               AND created_at >= $2 AND created_at < $3 \
             GROUP BY 1, 2",
            &[&user_id, &from, &to],
        )
        .await
        .map_err(MemoryError::Store)?;
    for row in resource_rows {
        let date: NaiveDate = row.get(0);
        let entry = day_entry(&mut days, user_id, date);
        let category: String = row.get(1);
        entry.resource_counts.insert(category, row.get(2));
    }

    Ok(days.into_values().collect())
}

// ============================================================================
// REMINDERS
// ============================================================================

/// Create a reminder moment and register the pg_cron one-shot that fires the
/// notification at its start time.
pub async fn create_reminder(
    store: &EntityStore,
    user_id: Uuid,
    tenant_id: Option<String>,
    name: &str,
    starts: Timestamp,
    summary: &str,
) -> Result<Moment, MemoryError> {
    let id = MomentId::deterministic(&format!("reminder-{}", normalise_key(name)), Some(user_id));
    let mut sys = SystemFields::new(id.as_uuid());
    sys.tenant_id = tenant_id;
    sys.user_id = Some(user_id);

    let moment = Moment {
        sys,
        name: name.to_string(),
        moment_type: MomentType::Reminder,
        summary: Some(summary.to_string()),
        starts_timestamp: Some(starts),
        previous_moment_keys: Vec::new(),
        session_id: None,
    };
    let stored = store
        .upsert("moments", record_from("moments", &moment)?, WriteOptions::default())
        .await?;
    let stored: Moment = record_into("moments", stored)?;

    // One-shot cron: insert the notification moment, then unschedule itself.
    let job_name = format!("rem-reminder-{}", id.as_uuid());
    let schedule = format!(
        "{} {} {} {} *",
        starts.minute(),
        starts.hour(),
        starts.day(),
        starts.month()
    );
    let notification_id =
        MomentId::deterministic(&format!("notification-{}", id.as_uuid()), Some(user_id));
    let payload = json!({
        "id": notification_id.as_uuid(),
        "created_at": Utc::now().to_rfc3339(),
        "updated_at": Utc::now().to_rfc3339(),
        "deleted_at": JsonValue::Null,
        "tenant_id": stored.sys.tenant_id,
        "user_id": user_id,
        "tags": [],
        "metadata": {"reminder_id": id.as_uuid()},
        "graph_edges": [],
        "encryption_level": "none",
        "name": format!("notification-{}", normalise_key(name)),
        "moment_type": "notification",
        "summary": summary,
        "starts_timestamp": starts.to_rfc3339(),
        "previous_moment_keys": [],
        "session_id": JsonValue::Null,
    });
    let command = format!(
        "SELECT rem_entity_upsert('moments', '{}'::jsonb); SELECT cron.unschedule('{}');",
        payload.to_string().replace('\'', "''"),
        job_name
    );
    store
        .db()
        .execute("SELECT cron.schedule($1, $2, $3)", &[&job_name, &schedule, &command])
        .await
        .map_err(MemoryError::Store)?;

    tracing::info!(reminder = %name, at = %starts, "reminder scheduled");
    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_names_are_deterministic() {
        let session = SessionId::new(Uuid::nil());
        let date = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        let a = moment_chain_name(session, date, 3);
        let b = moment_chain_name(session, date, 3);
        assert_eq!(a, b);
        assert!(a.starts_with("session-"));
        assert!(a.ends_with("-20260801-chunk-3"));
    }

    #[test]
    fn chain_names_differ_by_index() {
        let session = SessionId::new(Uuid::nil());
        let date = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        assert_ne!(
            moment_chain_name(session, date, 0),
            moment_chain_name(session, date, 1)
        );
    }

    #[test]
    fn daily_summary_ids_derive_from_user_and_date() {
        let user = Uuid::new_v4();
        let date = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        assert_eq!(daily_summary_id(user, date), daily_summary_id(user, date));
        assert_ne!(
            daily_summary_id(user, date),
            daily_summary_id(user, date.succ_opt().unwrap())
        );
        assert_ne!(
            daily_summary_id(user, date),
            daily_summary_id(Uuid::new_v4(), date)
        );
    }
}
