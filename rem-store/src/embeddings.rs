//! Embedding queue access
//!
//! The queue is written by triggers; workers claim batches under skip-locked
//! row locks, call the provider, and upsert through `rem_upsert_embedding`,
//! which also drops the queue row.

use crate::{db_error, Db};
use rem_core::{EmbeddingJob, StoreError, TaskStatus};
use std::str::FromStr;
use uuid::Uuid;

const MAX_ATTEMPTS: i32 = 3;

#[derive(Clone)]
pub struct EmbeddingQueue {
    db: Db,
}

impl EmbeddingQueue {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Claim up to `batch` pending jobs, oldest first.
    pub async fn claim(&self, batch: i64) -> Result<Vec<EmbeddingJob>, StoreError> {
        let rows = self
            .db
            .query(
                "UPDATE embedding_queue q SET status = 'processing' \
                 FROM (SELECT id FROM embedding_queue \
                       WHERE status = 'pending' \
                       ORDER BY created_at ASC \
                       LIMIT $1 \
                       FOR UPDATE SKIP LOCKED) next \
                 WHERE q.id = next.id \
                 RETURNING q.id, q.table_name, q.entity_id, q.field_name, q.status, \
                           q.attempts, q.error, q.created_at",
                &[&batch],
            )
            .await?;

        rows.into_iter()
            .map(|r| {
                let status: String = r.get(4);
                Ok(EmbeddingJob {
                    id: r.get(0),
                    table_name: r.get(1),
                    entity_id: r.get(2),
                    field_name: r.get(3),
                    status: TaskStatus::from_str(&status).map_err(|e| StoreError::Conversion {
                        table: "embedding_queue".to_string(),
                        reason: e,
                    })?,
                    attempts: r.get(5),
                    error: r.get(6),
                    created_at: r.get(7),
                })
            })
            .collect()
    }

    /// Store a vector and drop the queue row, replacing any previous vector
    /// for `(entity_id, field, provider)`.
    pub async fn upsert_embedding(
        &self,
        table: &str,
        entity_id: Uuid,
        field: &str,
        vector: &[f32],
        provider: &str,
        content_hash: &str,
    ) -> Result<(), StoreError> {
        let literal = vector_literal(vector);
        self.db
            .execute(
                "SELECT rem_upsert_embedding($1, $2, $3, $4::vector, $5, $6)",
                &[&table, &entity_id, &field, &literal, &provider, &content_hash],
            )
            .await?;
        Ok(())
    }

    /// Stored content hash for replay skip.
    pub async fn stored_hash(
        &self,
        table: &str,
        entity_id: Uuid,
        field: &str,
        provider: &str,
    ) -> Result<Option<String>, StoreError> {
        // Embedding table names come from the registry, not user input.
        let sql = format!(
            "SELECT content_hash FROM embeddings_{table} \
             WHERE entity_id = $1 AND field_name = $2 AND provider = $3"
        );
        let conn = self.db.conn().await?;
        let row = conn
            .query_opt(&sql, &[&entity_id, &field, &provider])
            .await
            .map_err(db_error)?;
        Ok(row.map(|r| r.get(0)))
    }

    /// Drop a queue row without writing a vector (content unchanged).
    pub async fn discard(&self, job: &EmbeddingJob) -> Result<(), StoreError> {
        self.db
            .execute("DELETE FROM embedding_queue WHERE id = $1", &[&job.id])
            .await?;
        Ok(())
    }

    /// Record a failure: back to pending up to the attempt cap, then failed
    /// with the error string.
    pub async fn fail(&self, job: &EmbeddingJob, error: &str) -> Result<TaskStatus, StoreError> {
        let next = if job.attempts + 1 < MAX_ATTEMPTS {
            TaskStatus::Pending
        } else {
            TaskStatus::Failed
        };
        self.db
            .execute(
                "UPDATE embedding_queue SET status = $2, attempts = attempts + 1, error = $3 \
                 WHERE id = $1",
                &[&job.id, &next.as_str(), &error],
            )
            .await?;
        Ok(next)
    }

    pub async fn pending_count(&self) -> Result<i64, StoreError> {
        let row = self
            .db
            .query_one(
                "SELECT count(*) FROM embedding_queue WHERE status = 'pending'",
                &[],
            )
            .await?;
        Ok(row.get(0))
    }
}

/// Render a pgvector literal: `[0.1,0.2,...]`.
pub fn vector_literal(vector: &[f32]) -> String {
    let mut out = String::with_capacity(vector.len() * 10 + 2);
    out.push('[');
    for (i, v) in vector.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&v.to_string());
    }
    out.push(']');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_literal_shape() {
        assert_eq!(vector_literal(&[]), "[]");
        assert_eq!(vector_literal(&[0.5, -1.0, 2.25]), "[0.5,-1,2.25]");
    }
}
