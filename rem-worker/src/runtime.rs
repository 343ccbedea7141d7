//! Worker loop
//!
//! claim → quota gate → dispatch → complete/fail, forever. Handler errors
//! and panics are contained per task; the loop itself only stops on the
//! shutdown signal.

use crate::handlers::HandlerRegistry;
use rem_core::{PlanTier, QueueError, Task, TaskTier};
use rem_queue::{PlanLimits, TaskQueue, UsageTracker};
use rem_store::EntityStore;
use serde_json::json;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

const CLAIM_BATCH: i32 = 4;
const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Default)]
pub struct WorkerMetrics {
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub skipped_quota: AtomicU64,
}

pub struct Worker {
    queue: Arc<TaskQueue>,
    usage: UsageTracker,
    store: Arc<EntityStore>,
    handlers: HandlerRegistry,
    tier: TaskTier,
    worker_id: String,
}

impl Worker {
    pub fn new(
        queue: Arc<TaskQueue>,
        usage: UsageTracker,
        store: Arc<EntityStore>,
        handlers: HandlerRegistry,
        tier: TaskTier,
        worker_id: impl Into<String>,
    ) -> Self {
        Self {
            queue,
            usage,
            store,
            handlers,
            tier,
            worker_id: worker_id.into(),
        }
    }

    /// Run until shutdown; returns the metrics.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) -> Arc<WorkerMetrics> {
        let metrics = Arc::new(WorkerMetrics::default());
        let mut poll = interval(POLL_INTERVAL);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            worker = %self.worker_id,
            tier = %self.tier,
            handlers = ?self.handlers.task_types(),
            "worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!(worker = %self.worker_id, "worker shutting down");
                        break;
                    }
                }

                _ = poll.tick() => {
                    let tasks = match self.queue.claim(self.tier, &self.worker_id, CLAIM_BATCH).await {
                        Ok(tasks) => tasks,
                        Err(e) => {
                            tracing::error!(worker = %self.worker_id, error = %e, "claim failed");
                            continue;
                        }
                    };
                    for task in tasks {
                        self.process(task, &metrics).await;
                    }
                }
            }
        }

        metrics
    }

    /// Handle one claimed task end to end. Every path finishes the claim.
    async fn process(&self, task: Task, metrics: &WorkerMetrics) {
        let task_id = task.id;
        let task_type = task.task_type.clone();

        // Quota gate: over-quota work is skipped, not failed — it completes
        // with a skip marker so the enqueuers do not respawn it immediately.
        if let Some(user_id) = task.user_id {
            if let Some(handler) = self.handlers.get(&task_type) {
                let resource = handler.resource_type().to_string();
                match self.check_quota(user_id, &resource).await {
                    Ok(()) => {}
                    Err(QueueError::QuotaExceeded { used, limit, .. }) => {
                        tracing::warn!(
                            task_id = %task_id, user_id = %user_id, resource = %resource,
                            used, limit, "task skipped: over quota"
                        );
                        metrics.skipped_quota.fetch_add(1, Ordering::Relaxed);
                        if let Err(e) = self
                            .queue
                            .complete(task_id, Some(json!({"skipped": "quota_exceeded"})))
                            .await
                        {
                            tracing::error!(task_id = %task_id, error = %e, "could not record quota skip");
                        }
                        return;
                    }
                    Err(e) => {
                        tracing::error!(task_id = %task_id, error = %e, "quota check failed");
                        let _ = self.queue.fail(task_id, &e.to_string()).await;
                        metrics.failed.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                }
            }
        }

        let Some(handler) = self.handlers.get(&task_type) else {
            tracing::error!(task_id = %task_id, task_type = %task_type, "no handler for task type");
            let _ = self
                .queue
                .fail(task_id, &format!("no handler registered for '{task_type}'"))
                .await;
            metrics.failed.fetch_add(1, Ordering::Relaxed);
            return;
        };

        // Panics are contained to the task by running the handler on its
        // own spawn.
        let handler = Arc::clone(handler);
        let task_for_handler = task.clone();
        let outcome =
            tokio::spawn(async move { handler.handle(&task_for_handler).await }).await;

        match outcome {
            Ok(Ok(result)) => {
                let tokens_used = result.get("tokens_used").and_then(|v| v.as_i64()).unwrap_or(0);
                if let Err(e) = self.queue.complete(task_id, Some(result)).await {
                    tracing::error!(task_id = %task_id, error = %e, "complete failed");
                    return;
                }
                metrics.completed.fetch_add(1, Ordering::Relaxed);
                self.record_usage(&task, tokens_used).await;
            }
            Ok(Err(e)) => {
                tracing::error!(task_id = %task_id, task_type = %task_type, error = %e, "task failed");
                match self.queue.fail(task_id, &e.to_string()).await {
                    Ok(status) => {
                        tracing::info!(task_id = %task_id, status = %status, "task rescheduled or failed")
                    }
                    Err(e) => tracing::error!(task_id = %task_id, error = %e, "fail transition failed"),
                }
                metrics.failed.fetch_add(1, Ordering::Relaxed);
            }
            Err(join_err) => {
                tracing::error!(task_id = %task_id, error = %join_err, "handler panicked");
                let _ = self
                    .queue
                    .fail(task_id, &format!("handler panicked: {join_err}"))
                    .await;
                metrics.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    async fn check_quota(&self, user_id: uuid::Uuid, resource: &str) -> Result<(), QueueError> {
        let plan = self.user_plan(user_id).await;
        self.usage.check_quota(user_id, plan, resource).await
    }

    /// Post-completion accounting: one request, reported tokens, and the
    /// claim-to-completion wall time in minutes.
    async fn record_usage(&self, task: &Task, tokens_used: i64) {
        let Some(user_id) = task.user_id else { return };
        let plan = self.user_plan(user_id).await;
        let limits = PlanLimits::for_plan(plan);

        if let Err(e) = self
            .usage
            .increment(user_id, rem_queue::resources::REQUESTS, 1, limits.requests)
            .await
        {
            tracing::error!(user_id = %user_id, error = %e, "request usage increment failed");
        }
        if tokens_used > 0 {
            if let Err(e) = self
                .usage
                .increment(user_id, rem_queue::resources::TOKENS, tokens_used, limits.tokens)
                .await
            {
                tracing::error!(user_id = %user_id, error = %e, "token usage increment failed");
            }
        }
        let minutes_used = elapsed_minutes(task.claimed_at, chrono::Utc::now());
        if minutes_used > 0 {
            if let Err(e) = self
                .usage
                .increment(user_id, rem_queue::resources::MINUTES, minutes_used, limits.minutes)
                .await
            {
                tracing::error!(user_id = %user_id, error = %e, "minute usage increment failed");
            }
        }
    }

    async fn user_plan(&self, user_id: uuid::Uuid) -> PlanTier {
        match self.store.get("users", user_id).await {
            Ok(Some(record)) => record
                .str_field("plan")
                .and_then(|p| PlanTier::from_str(p).ok())
                .unwrap_or_default(),
            _ => PlanTier::default(),
        }
    }
}

/// Whole minutes between claim and completion, rounded up so sub-minute
/// tasks still meter as one minute. Tasks without a claim stamp meter zero.
fn elapsed_minutes(
    claimed_at: Option<chrono::DateTime<chrono::Utc>>,
    now: chrono::DateTime<chrono::Utc>,
) -> i64 {
    let Some(claimed_at) = claimed_at else { return 0 };
    let seconds = (now - claimed_at).num_seconds().max(0);
    if seconds == 0 {
        1
    } else {
        (seconds + 59) / 60
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_start_at_zero() {
        let metrics = WorkerMetrics::default();
        assert_eq!(metrics.completed.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.failed.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.skipped_quota.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn elapsed_minutes_rounds_up() {
        let now = chrono::Utc::now();
        assert_eq!(elapsed_minutes(None, now), 0);
        assert_eq!(elapsed_minutes(Some(now), now), 1);
        assert_eq!(
            elapsed_minutes(Some(now - chrono::Duration::seconds(30)), now),
            1
        );
        assert_eq!(
            elapsed_minutes(Some(now - chrono::Duration::seconds(61)), now),
            2
        );
        assert_eq!(
            elapsed_minutes(Some(now - chrono::Duration::minutes(5)), now),
            5
        );
    }
}
