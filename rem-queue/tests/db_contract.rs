//! Queue contract tests against a live Postgres with the REM schema.
//!
//! Run with: `P8_DATABASE_URL=... cargo test -p rem-queue --features db-tests`

#![cfg(feature = "db-tests")]

use rem_core::{TaskStatus, TaskTier};
use rem_queue::{EnqueueRequest, TaskQueue};
use rem_store::{install, Db, DbConfig};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

async fn queue() -> Arc<TaskQueue> {
    let db = Db::from_config(&DbConfig::from_env()).expect("pool");
    install(&db).await.expect("install");
    Arc::new(TaskQueue::new(db))
}

#[tokio::test]
async fn empty_claim_is_an_empty_set() {
    let queue = queue().await;
    let claimed = queue
        .claim(TaskTier::Micro, "contract-empty", 8)
        .await
        .expect("claim");
    assert!(claimed.is_empty());
}

#[tokio::test]
async fn contended_claims_hand_out_each_task_once() {
    let queue = queue().await;
    let mut enqueued = HashSet::new();
    for i in 0..10 {
        let id = queue
            .enqueue(
                EnqueueRequest::new("contract_noop", TaskTier::Large)
                    .with_payload(serde_json::json!({"n": i})),
            )
            .await
            .expect("enqueue");
        enqueued.insert(id);
    }

    // Three concurrent workers race over the same tier.
    let workers: Vec<_> = (0..3)
        .map(|w| {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                let mut mine = Vec::new();
                loop {
                    let claimed = queue
                        .claim(TaskTier::Large, &format!("contract-w{w}"), 2)
                        .await
                        .expect("claim");
                    if claimed.is_empty() {
                        break;
                    }
                    for task in claimed {
                        queue.complete(task.id, None).await.expect("complete");
                        mine.push(task.id);
                    }
                }
                mine
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for worker in workers {
        for id in worker.await.expect("join") {
            // Exactly-once: no task may be handed to two workers.
            assert!(seen.insert(id), "task {id} claimed twice");
        }
    }
    for id in enqueued {
        assert!(seen.contains(&id), "task {id} never claimed");
        assert_eq!(queue.get(id).await.expect("get").status, TaskStatus::Completed);
    }
}

#[tokio::test]
async fn fail_backs_off_then_goes_terminal() {
    let queue = queue().await;
    let id = queue
        .enqueue(EnqueueRequest::new("contract_fail", TaskTier::Micro))
        .await
        .expect("enqueue");

    for attempt in 0..3 {
        let claimed = queue
            .claim(TaskTier::Micro, "contract-fail", 1)
            .await
            .expect("claim");
        if claimed.is_empty() {
            // Backoff pushed scheduled_at forward; pull it back for the test.
            queue
                .db()
                .execute(
                    "UPDATE task_queue SET scheduled_at = now() WHERE id = $1",
                    &[&uuid::Uuid::from(id)],
                )
                .await
                .expect("reschedule");
            continue;
        }
        let status = queue.fail(id, "boom").await.expect("fail");
        assert_eq!(status, TaskStatus::Pending, "attempt {attempt} should retry");
        let task = queue.get(id).await.expect("get");
        assert!(task.scheduled_at > chrono::Utc::now());
        queue
            .db()
            .execute(
                "UPDATE task_queue SET scheduled_at = now() WHERE id = $1",
                &[&uuid::Uuid::from(id)],
            )
            .await
            .expect("reschedule");
    }

    queue
        .claim(TaskTier::Micro, "contract-fail", 1)
        .await
        .expect("claim");
    let status = queue.fail(id, "boom final").await.expect("fail");
    assert_eq!(status, TaskStatus::Failed);

    // Terminal rows never move backward except through the admin reset.
    let task = queue.get(id).await.expect("get");
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(queue.reset(id).await.expect("reset"));
    assert_eq!(queue.get(id).await.expect("get").status, TaskStatus::Pending);
}

#[tokio::test]
async fn stale_claims_are_recovered() {
    let queue = queue().await;
    let id = queue
        .enqueue(EnqueueRequest::new("contract_stale", TaskTier::Micro))
        .await
        .expect("enqueue");
    let claimed = queue
        .claim(TaskTier::Micro, "contract-stale", 1)
        .await
        .expect("claim");
    assert_eq!(claimed.len(), 1);

    // Age the claim past the threshold.
    queue
        .db()
        .execute(
            "UPDATE task_queue SET claimed_at = now() - interval '20 minutes' WHERE id = $1",
            &[&uuid::Uuid::from(id)],
        )
        .await
        .expect("age claim");

    let recovered = queue
        .recover_stale(Duration::from_secs(900))
        .await
        .expect("recover");
    assert!(recovered.iter().any(|(rid, _)| *rid == id));

    let task = queue.get(id).await.expect("get");
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(task.claimed_at.is_none());
    assert!(task.claimed_by.is_none());
}
