//! Task queue client
//!
//! Thin typed layer over the `rem_claim_tasks` / `rem_complete_task` /
//! `rem_fail_task` / `rem_recover_stale` SQL functions from installer
//! script 3. State transitions are totally ordered per row; the admin reset
//! is the only backward path out of a terminal status.

use rem_core::{EntityIdType, QueueError, Task, TaskId, TaskStatus, TaskTier, Timestamp};
use rem_store::{db_error, Db};
use serde_json::Value as JsonValue;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Fields for a new task.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub task_type: String,
    pub tier: TaskTier,
    pub tenant_id: Option<String>,
    pub user_id: Option<Uuid>,
    pub payload: JsonValue,
    pub priority: i32,
    /// Defer execution; `None` means runnable now.
    pub scheduled_at: Option<Timestamp>,
}

impl EnqueueRequest {
    pub fn new(task_type: impl Into<String>, tier: TaskTier) -> Self {
        Self {
            task_type: task_type.into(),
            tier,
            tenant_id: None,
            user_id: None,
            payload: JsonValue::Object(Default::default()),
            priority: 0,
            scheduled_at: None,
        }
    }

    pub fn for_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_payload(mut self, payload: JsonValue) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[derive(Clone)]
pub struct TaskQueue {
    db: Db,
}

impl TaskQueue {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub async fn enqueue(&self, req: EnqueueRequest) -> Result<TaskId, QueueError> {
        let id = TaskId::now_v7();
        let scheduled = req.scheduled_at.unwrap_or_else(chrono::Utc::now);
        self.db
            .execute(
                "INSERT INTO task_queue (id, task_type, tier, tenant_id, user_id, payload, \
                 priority, scheduled_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                &[
                    &id.as_uuid(),
                    &req.task_type,
                    &req.tier.as_str(),
                    &req.tenant_id,
                    &req.user_id,
                    &req.payload,
                    &req.priority,
                    &scheduled,
                ],
            )
            .await?;
        tracing::debug!(task_id = %id, task_type = %req.task_type, tier = %req.tier, "task enqueued");
        Ok(id)
    }

    /// Atomically claim up to `batch` runnable tasks for one tier.
    /// An empty queue yields an empty set, not an error.
    pub async fn claim(
        &self,
        tier: TaskTier,
        worker_id: &str,
        batch: i32,
    ) -> Result<Vec<Task>, QueueError> {
        let rows = self
            .db
            .query(
                "SELECT * FROM rem_claim_tasks($1, $2, $3)",
                &[&tier.as_str(), &worker_id, &batch],
            )
            .await?;
        rows.iter().map(parse_task_row).collect()
    }

    pub async fn complete(&self, id: TaskId, result: Option<JsonValue>) -> Result<(), QueueError> {
        let row = self
            .db
            .query_one("SELECT rem_complete_task($1, $2)", &[&id.as_uuid(), &result])
            .await?;
        let done: Option<bool> = row.get(0);
        if done != Some(true) {
            return Err(QueueError::TaskNotFound { id: id.as_uuid() });
        }
        Ok(())
    }

    /// Record a failure: backoff reschedule while retries remain, terminal
    /// `failed` afterwards. Returns the resulting status.
    pub async fn fail(&self, id: TaskId, error: &str) -> Result<TaskStatus, QueueError> {
        let row = self
            .db
            .query_one("SELECT rem_fail_task($1, $2)", &[&id.as_uuid(), &error])
            .await?;
        let status: Option<String> = row.get(0);
        let status = status.ok_or(QueueError::TaskNotFound { id: id.as_uuid() })?;
        TaskStatus::from_str(&status).map_err(|reason| {
            QueueError::Store(rem_core::StoreError::Conversion {
                table: "task_queue".to_string(),
                reason,
            })
        })
    }

    /// Reclaim processing rows whose claim is older than `stale_after`.
    pub async fn recover_stale(
        &self,
        stale_after: Duration,
    ) -> Result<Vec<(TaskId, TaskStatus)>, QueueError> {
        let interval = format!("{} seconds", stale_after.as_secs());
        let conn = self.db.conn().await.map_err(QueueError::Store)?;
        let rows = conn
            .query(
                "SELECT task_id, outcome FROM rem_recover_stale($1::interval)",
                &[&interval],
            )
            .await
            .map_err(|e| QueueError::Store(db_error(e)))?;

        rows.into_iter()
            .map(|row| {
                let id: Uuid = row.get(0);
                let outcome: String = row.get(1);
                let status = TaskStatus::from_str(&outcome).map_err(|reason| {
                    QueueError::Store(rem_core::StoreError::Conversion {
                        table: "task_queue".to_string(),
                        reason,
                    })
                })?;
                Ok((TaskId::new(id), status))
            })
            .collect()
    }

    /// Admin reset: terminal row back to pending.
    pub async fn reset(&self, id: TaskId) -> Result<bool, QueueError> {
        let row = self
            .db
            .query_one("SELECT rem_reset_task($1)", &[&id.as_uuid()])
            .await?;
        let reset: Option<bool> = row.get(0);
        Ok(reset == Some(true))
    }

    pub async fn get(&self, id: TaskId) -> Result<Task, QueueError> {
        let row = self
            .db
            .query_opt("SELECT * FROM task_queue WHERE id = $1", &[&id.as_uuid()])
            .await?
            .ok_or(QueueError::TaskNotFound { id: id.as_uuid() })?;
        parse_task_row(&row)
    }
}

fn parse_task_row(row: &tokio_postgres::Row) -> Result<Task, QueueError> {
    let tier: String = row.get("tier");
    let status: String = row.get("status");
    let convert = |reason: String| {
        QueueError::Store(rem_core::StoreError::Conversion {
            table: "task_queue".to_string(),
            reason,
        })
    };
    Ok(Task {
        id: TaskId::new(row.get("id")),
        task_type: row.get("task_type"),
        tier: TaskTier::from_str(&tier).map_err(convert)?,
        tenant_id: row.get("tenant_id"),
        user_id: row.get("user_id"),
        payload: row.get("payload"),
        status: TaskStatus::from_str(&status).map_err(convert)?,
        priority: row.get("priority"),
        scheduled_at: row.get("scheduled_at"),
        claimed_at: row.get("claimed_at"),
        claimed_by: row.get("claimed_by"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        error: row.get("error"),
        retry_count: row.get("retry_count"),
        max_retries: row.get("max_retries"),
        result: row.get("result"),
        created_at: row.get("created_at"),
    })
}

/// The backoff schedule implemented by `rem_fail_task`: 30s · 4^retry.
pub fn backoff_delay(retry_count: i32) -> Duration {
    Duration::from_secs(30 * 4u64.pow(retry_count.max(0) as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_matches_the_queue() {
        assert_eq!(backoff_delay(0), Duration::from_secs(30));
        assert_eq!(backoff_delay(1), Duration::from_secs(120));
        assert_eq!(backoff_delay(2), Duration::from_secs(480));
        assert_eq!(backoff_delay(3), Duration::from_secs(1920));
    }

    #[test]
    fn enqueue_request_builder() {
        let user = Uuid::new_v4();
        let req = EnqueueRequest::new("dreaming", TaskTier::Small)
            .for_user(user)
            .with_priority(5);
        assert_eq!(req.task_type, "dreaming");
        assert_eq!(req.user_id, Some(user));
        assert_eq!(req.priority, 5);
        assert!(req.scheduled_at.is_none());
    }
}
