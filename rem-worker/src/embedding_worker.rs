//! Embedding worker
//!
//! Drains the trigger-fed queue: claim a batch under skip-locked semantics,
//! load and decrypt the source text, skip unchanged content by hash, embed,
//! and upsert keyed by (entity_id, field, provider).

use rem_core::content_hash;
use rem_llm::EmbeddingProvider;
use rem_store::{EmbeddingQueue, EntityStore};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

const BATCH_SIZE: i64 = 16;
const POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
pub struct EmbeddingMetrics {
    pub embedded: AtomicU64,
    pub skipped_unchanged: AtomicU64,
    pub failed: AtomicU64,
}

/// Run the embedding worker until shutdown.
pub async fn embedding_worker_task(
    queue: EmbeddingQueue,
    store: Arc<EntityStore>,
    provider: Arc<dyn EmbeddingProvider>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<EmbeddingMetrics> {
    let metrics = Arc::new(EmbeddingMetrics::default());
    let mut poll = interval(POLL_INTERVAL);
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(provider = provider.model_id(), "embedding worker started");

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("embedding worker shutting down");
                    break;
                }
            }

            _ = poll.tick() => {
                let jobs = match queue.claim(BATCH_SIZE).await {
                    Ok(jobs) => jobs,
                    Err(e) => {
                        tracing::error!(error = %e, "embedding claim failed");
                        continue;
                    }
                };
                for job in jobs {
                    process_job(&queue, &store, provider.as_ref(), &metrics, &job).await;
                }
            }
        }
    }

    metrics
}

async fn process_job(
    queue: &EmbeddingQueue,
    store: &EntityStore,
    provider: &dyn EmbeddingProvider,
    metrics: &EmbeddingMetrics,
    job: &rem_core::EmbeddingJob,
) {
    let result = embed_one(queue, store, provider, job).await;
    match result {
        Ok(true) => {
            metrics.embedded.fetch_add(1, Ordering::Relaxed);
        }
        Ok(false) => {
            metrics.skipped_unchanged.fetch_add(1, Ordering::Relaxed);
        }
        Err(reason) => {
            metrics.failed.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                table = %job.table_name,
                entity_id = %job.entity_id,
                error = %reason,
                "embedding job failed"
            );
            if let Err(e) = queue.fail(job, &reason).await {
                tracing::error!(error = %e, "could not record embedding failure");
            }
        }
    }
}

/// Returns Ok(true) when a vector was written, Ok(false) on unchanged skip.
async fn embed_one(
    queue: &EmbeddingQueue,
    store: &EntityStore,
    provider: &dyn EmbeddingProvider,
    job: &rem_core::EmbeddingJob,
) -> Result<bool, String> {
    let record = store
        .get(&job.table_name, job.entity_id)
        .await
        .map_err(|e| e.to_string())?;

    // Source row gone or field empty: nothing to embed, drop the queue row.
    let Some(record) = record else {
        queue.discard(job).await.map_err(|e| e.to_string())?;
        return Ok(false);
    };
    let Some(text) = record.str_field(&job.field_name).map(str::to_string) else {
        queue.discard(job).await.map_err(|e| e.to_string())?;
        return Ok(false);
    };

    let hash = content_hash(&text);
    let stored = queue
        .stored_hash(&job.table_name, job.entity_id, &job.field_name, provider.model_id())
        .await
        .map_err(|e| e.to_string())?;
    if stored.as_deref() == Some(hash.as_str()) {
        queue.discard(job).await.map_err(|e| e.to_string())?;
        return Ok(false);
    }

    let vector = provider.embed(&text).await.map_err(|e| e.to_string())?;
    queue
        .upsert_embedding(
            &job.table_name,
            job.entity_id,
            &job.field_name,
            &vector,
            provider.model_id(),
            &hash,
        )
        .await
        .map_err(|e| e.to_string())?;
    Ok(true)
}
