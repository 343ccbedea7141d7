//! Scheduler
//!
//! Long-running loop owning the periodic work: stale-claim recovery every
//! five minutes, the hourly dreaming enqueuer, and the daily news and
//! reading-summary enqueuers. Shuts down via a watch signal; activity is
//! counted in atomic metrics.

use crate::{EnqueueRequest, TaskQueue};
use rem_core::{QueueError, SchedulerConfig, TaskTier};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use uuid::Uuid;

pub const TASK_DREAMING: &str = "dreaming";
pub const TASK_NEWS: &str = "news";
pub const TASK_READING_SUMMARY: &str = "reading_summary";
pub const TASK_FILE_PROCESSING: &str = "file_processing";

/// Scheduler activity counters.
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    pub stale_recovered: AtomicU64,
    pub dreaming_enqueued: AtomicU64,
    pub news_enqueued: AtomicU64,
    pub reading_enqueued: AtomicU64,
    pub cycles: AtomicU64,
    pub errors: AtomicU64,
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            stale_recovered: self.stale_recovered.load(Ordering::Relaxed),
            dreaming_enqueued: self.dreaming_enqueued.load(Ordering::Relaxed),
            news_enqueued: self.news_enqueued.load(Ordering::Relaxed),
            reading_enqueued: self.reading_enqueued.load(Ordering::Relaxed),
            cycles: self.cycles.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerSnapshot {
    pub stale_recovered: u64,
    pub dreaming_enqueued: u64,
    pub news_enqueued: u64,
    pub reading_enqueued: u64,
    pub cycles: u64,
    pub errors: u64,
}

/// Run the scheduler until shutdown. Returns its metrics.
pub async fn scheduler_task(
    queue: Arc<TaskQueue>,
    config: SchedulerConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<SchedulerMetrics> {
    let metrics = Arc::new(SchedulerMetrics::new());

    let mut recovery = interval(config.recovery_interval);
    recovery.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut dreaming = interval(config.dreaming_interval);
    dreaming.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // Daily jobs are hour-gated off a minute tick.
    let mut daily = interval(std::time::Duration::from_secs(60));
    daily.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_daily_run: Option<chrono::NaiveDate> = None;

    tracing::info!(
        recovery_secs = config.recovery_interval.as_secs(),
        dreaming_secs = config.dreaming_interval.as_secs(),
        news_hour_utc = config.news_hour_utc,
        "scheduler started"
    );

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("scheduler shutting down");
                    break;
                }
            }

            _ = recovery.tick() => {
                metrics.cycles.fetch_add(1, Ordering::Relaxed);
                match queue.recover_stale(config.stale_after).await {
                    Ok(recovered) => {
                        if !recovered.is_empty() {
                            tracing::warn!(count = recovered.len(), "recovered stale task claims");
                            metrics.stale_recovered.fetch_add(recovered.len() as u64, Ordering::Relaxed);
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "stale recovery failed");
                        metrics.errors.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }

            _ = dreaming.tick() => {
                match enqueue_dreaming(&queue).await {
                    Ok(count) => {
                        metrics.dreaming_enqueued.fetch_add(count, Ordering::Relaxed);
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "dreaming enqueuer failed");
                        metrics.errors.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }

            _ = daily.tick() => {
                let now = chrono::Utc::now();
                let today = now.date_naive();
                if chrono::Timelike::hour(&now) != config.news_hour_utc
                    || last_daily_run == Some(today)
                {
                    continue;
                }
                last_daily_run = Some(today);

                match enqueue_news(&queue).await {
                    Ok(count) => {
                        metrics.news_enqueued.fetch_add(count, Ordering::Relaxed);
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "news enqueuer failed");
                        metrics.errors.fetch_add(1, Ordering::Relaxed);
                    }
                }
                match enqueue_reading_summaries(&queue).await {
                    Ok(count) => {
                        metrics.reading_enqueued.fetch_add(count, Ordering::Relaxed);
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "reading-summary enqueuer failed");
                        metrics.errors.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        stale_recovered = snapshot.stale_recovered,
        dreaming = snapshot.dreaming_enqueued,
        news = snapshot.news_enqueued,
        reading = snapshot.reading_enqueued,
        errors = snapshot.errors,
        "scheduler stopped"
    );
    metrics
}

/// Users with activity since their last dreaming task, skipping users with a
/// dreaming task already pending or processing.
pub async fn enqueue_dreaming(queue: &TaskQueue) -> Result<u64, QueueError> {
    let rows = queue
        .db()
        .query(
            "SELECT u.id, u.tenant_id FROM users u \
             WHERE u.deleted_at IS NULL \
               AND NOT EXISTS ( \
                   SELECT 1 FROM task_queue t \
                   WHERE t.user_id = u.id AND t.task_type = 'dreaming' \
                     AND t.status IN ('pending', 'processing')) \
               AND ( \
                   EXISTS ( \
                       SELECT 1 FROM messages m \
                       WHERE m.user_id = u.id AND m.deleted_at IS NULL \
                         AND m.created_at > coalesce( \
                             (SELECT max(t.created_at) FROM task_queue t \
                              WHERE t.user_id = u.id AND t.task_type = 'dreaming'), \
                             '-infinity')) \
                   OR EXISTS ( \
                       SELECT 1 FROM files f \
                       WHERE f.user_id = u.id AND f.deleted_at IS NULL \
                         AND f.processing_status = 'completed' \
                         AND f.updated_at > coalesce( \
                             (SELECT max(t.created_at) FROM task_queue t \
                              WHERE t.user_id = u.id AND t.task_type = 'dreaming'), \
                             '-infinity')))",
            &[],
        )
        .await?;

    let mut enqueued = 0u64;
    for row in rows {
        let user_id: Uuid = row.get(0);
        let tenant_id: Option<String> = row.get(1);
        let mut req = EnqueueRequest::new(TASK_DREAMING, TaskTier::Medium).for_user(user_id);
        req.tenant_id = tenant_id;
        queue.enqueue(req).await?;
        enqueued += 1;
    }
    if enqueued > 0 {
        tracing::info!(count = enqueued, "dreaming tasks enqueued");
    }
    Ok(enqueued)
}

/// Users with non-empty interests get a daily news task.
pub async fn enqueue_news(queue: &TaskQueue) -> Result<u64, QueueError> {
    let rows = queue
        .db()
        .query(
            "SELECT u.id, u.tenant_id, u.interests FROM users u \
             WHERE u.deleted_at IS NULL AND cardinality(u.interests) > 0 \
               AND NOT EXISTS ( \
                   SELECT 1 FROM task_queue t \
                   WHERE t.user_id = u.id AND t.task_type = 'news' \
                     AND t.status IN ('pending', 'processing'))",
            &[],
        )
        .await?;

    let mut enqueued = 0u64;
    for row in rows {
        let user_id: Uuid = row.get(0);
        let tenant_id: Option<String> = row.get(1);
        let interests: Vec<String> = row.get(2);
        let mut req = EnqueueRequest::new(TASK_NEWS, TaskTier::Small)
            .for_user(user_id)
            .with_payload(json!({ "interests": interests }));
        req.tenant_id = tenant_id;
        queue.enqueue(req).await?;
        enqueued += 1;
    }
    if enqueued > 0 {
        tracing::info!(count = enqueued, "news tasks enqueued");
    }
    Ok(enqueued)
}

/// Reading moments with an empty summary and at least one item get a
/// summariser task.
pub async fn enqueue_reading_summaries(queue: &TaskQueue) -> Result<u64, QueueError> {
    let rows = queue
        .db()
        .query(
            "SELECT m.id, m.user_id, m.tenant_id FROM moments m \
             WHERE m.deleted_at IS NULL AND m.moment_type = 'reading' \
               AND (m.summary IS NULL OR m.summary = '') \
               AND jsonb_array_length(coalesce(m.metadata->'items', '[]'::jsonb)) >= 1 \
               AND NOT EXISTS ( \
                   SELECT 1 FROM task_queue t \
                   WHERE t.task_type = 'reading_summary' \
                     AND t.payload->>'moment_id' = m.id::text \
                     AND t.status IN ('pending', 'processing'))",
            &[],
        )
        .await?;

    let mut enqueued = 0u64;
    for row in rows {
        let moment_id: Uuid = row.get(0);
        let user_id: Option<Uuid> = row.get(1);
        let tenant_id: Option<String> = row.get(2);
        let mut req = EnqueueRequest::new(TASK_READING_SUMMARY, TaskTier::Small)
            .with_payload(json!({ "moment_id": moment_id }));
        req.user_id = user_id;
        req.tenant_id = tenant_id;
        queue.enqueue(req).await?;
        enqueued += 1;
    }
    if enqueued > 0 {
        tracing::info!(count = enqueued, "reading-summary tasks enqueued");
    }
    Ok(enqueued)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_snapshot_reflects_counters() {
        let metrics = SchedulerMetrics::new();
        metrics.dreaming_enqueued.store(4, Ordering::Relaxed);
        metrics.errors.store(1, Ordering::Relaxed);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.dreaming_enqueued, 4);
        assert_eq!(snapshot.errors, 1);
        assert_eq!(snapshot.news_enqueued, 0);
    }
}
