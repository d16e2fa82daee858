//! Integration tests for the Redis job store.
//!
//! These tests run against a real Redis server using testcontainers.
//! Requires Docker to be available on the system.

mod common;

use common::{is_done, names_for, wait_for, TestRedis, TICK};
use docket_jobs::{
    record_handler, Attempts, DequeueOptions, EnqueueOptions, JobError, JobFilter, JobRecord,
    JobStatus, JobStore,
};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_never_share_a_job() {
    let redis = TestRedis::new().await;
    let queue = redis.docket().queue("work");

    for n in 0..40 {
        queue
            .enqueue("crunch", json!({ "n": n }), common::ready())
            .await
            .expect("Failed to enqueue");
    }

    let mut claimants = Vec::new();
    for w in 0..8 {
        let queue = queue.clone();
        claimants.push(tokio::spawn(async move {
            let worker = format!("claimant-{w}");
            let mut claimed = Vec::new();
            while let Some(job) = queue
                .dequeue(&worker, &DequeueOptions::default())
                .await
                .expect("Failed to claim")
            {
                assert_eq!(job.record().worker.as_deref(), Some(worker.as_str()));
                claimed.push(job.id().expect("claimed job has an id"));
            }
            claimed
        }));
    }

    let mut all = Vec::new();
    for claimant in claimants {
        all.extend(claimant.await.expect("claimant panicked"));
    }

    let unique: HashSet<_> = all.iter().copied().collect();
    assert_eq!(all.len(), 40);
    assert_eq!(unique.len(), 40);
    for id in all {
        let stored = queue.get(id).await.expect("get").expect("stored");
        assert_eq!(stored.status(), JobStatus::Dequeued);
    }
}

#[tokio::test]
async fn test_claims_follow_priority_then_insertion_order() {
    let redis = TestRedis::new().await;
    let queue = redis.docket().queue("work");

    let mut ids = Vec::new();
    for priority in [5, 1, 5, 3] {
        let job = queue
            .enqueue("a", Value::Null, common::ready().priority(priority))
            .await
            .expect("Failed to enqueue");
        ids.push(job.id().expect("id"));
    }

    let mut order = Vec::new();
    while let Some(job) = queue
        .dequeue("w", &DequeueOptions::default())
        .await
        .expect("Failed to claim")
    {
        order.push(job.id().expect("id"));
    }
    assert_eq!(order, vec![ids[0], ids[2], ids[3], ids[1]]);
}

#[tokio::test]
async fn test_delayed_job_is_claimable_once_due() {
    let redis = TestRedis::new().await;
    let queue = redis.docket().queue("work");

    let job = queue
        .enqueue("later", Value::Null, EnqueueOptions::new().delay(Duration::from_millis(300)))
        .await
        .expect("Failed to enqueue");
    assert!(queue
        .dequeue("w", &DequeueOptions::default())
        .await
        .expect("Failed to claim")
        .is_none());

    tokio::time::sleep(Duration::from_millis(400)).await;
    let claimed = queue
        .dequeue("w", &DequeueOptions::default())
        .await
        .expect("Failed to claim")
        .expect("due job");
    assert_eq!(claimed.id(), job.id());
}

#[tokio::test]
async fn test_claim_skips_jobs_below_priority_floor() {
    let redis = TestRedis::new().await;
    let queue = redis.docket().queue("work");

    queue
        .enqueue("low", Value::Null, common::ready().priority(-2))
        .await
        .expect("Failed to enqueue");
    let high = queue
        .enqueue("high", Value::Null, common::ready().priority(4))
        .await
        .expect("Failed to enqueue");

    let options = DequeueOptions {
        min_priority: Some(0),
        ..DequeueOptions::default()
    };
    let claimed = queue.dequeue("w", &options).await.expect("Failed to claim");
    assert_eq!(claimed.and_then(|job| job.id()), high.id());
    assert!(queue.dequeue("w", &options).await.expect("Failed to claim").is_none());
}

#[tokio::test]
async fn test_paused_jobs_wait_for_unpause() {
    let redis = TestRedis::new().await;
    let queue = redis.docket().queue("work");

    queue
        .enqueue("a", Value::Null, common::ready().paused())
        .await
        .expect("Failed to enqueue");
    let b = queue
        .enqueue("b", Value::Null, common::ready().paused())
        .await
        .expect("Failed to enqueue");
    assert!(queue
        .dequeue("w", &DequeueOptions::default())
        .await
        .expect("Failed to claim")
        .is_none());

    let unpaused = queue
        .unpause(&JobFilter::new().name("b"))
        .await
        .expect("Failed to unpause");
    assert_eq!(unpaused, 1);
    let claimed = queue
        .dequeue("w", &DequeueOptions::default())
        .await
        .expect("Failed to claim")
        .expect("unpaused job");
    assert_eq!(claimed.id(), b.id());
    assert!(queue
        .dequeue("w", &DequeueOptions::default())
        .await
        .expect("Failed to claim")
        .is_none());
}

#[tokio::test]
async fn test_save_rejects_stale_status() {
    let redis = TestRedis::new().await;
    let store = redis.store();
    let queue = redis.docket().queue("work");

    let mut producer = queue
        .enqueue("a", Value::Null, common::ready())
        .await
        .expect("Failed to enqueue");
    let mut claimed = queue
        .dequeue("w", &DequeueOptions::default())
        .await
        .expect("Failed to claim")
        .expect("claimable");
    claimed
        .complete(Some(json!("done")))
        .await
        .expect("Failed to complete");

    let mut stale = producer.record().clone();
    stale.status = JobStatus::Cancelled;
    let err = store
        .save(&stale, JobStatus::Queued)
        .await
        .expect_err("stale save must fail");
    assert!(matches!(
        err,
        JobError::Conflict {
            expected: JobStatus::Queued,
            actual: JobStatus::Complete,
            ..
        }
    ));

    let err = producer.cancel().await.expect_err("stale cancel must fail");
    assert!(matches!(
        err,
        JobError::InvalidTransition {
            status: JobStatus::Complete,
            ..
        }
    ));
    let stored = queue
        .get(producer.id().expect("id"))
        .await
        .expect("get")
        .expect("stored");
    assert_eq!(stored.status(), JobStatus::Complete);
    assert_eq!(stored.record().result, Some(json!("done")));
}

#[tokio::test]
async fn test_requeued_job_respects_new_delay() {
    let redis = TestRedis::new().await;
    let queue = redis.docket().queue("work");

    let mut job = queue
        .enqueue("a", Value::Null, common::ready())
        .await
        .expect("Failed to enqueue");
    job.delay(Duration::from_secs(60))
        .await
        .expect("Failed to delay");
    assert_eq!(job.status(), JobStatus::Queued);
    assert!(queue
        .dequeue("w", &DequeueOptions::default())
        .await
        .expect("Failed to claim")
        .is_none());
}

#[tokio::test]
async fn test_worker_retries_then_completes() {
    let redis = TestRedis::new().await;
    let docket = redis.docket();
    let queue = docket.queue("work");
    let job = queue
        .enqueue(
            "flaky",
            json!({}),
            common::ready().attempts(Attempts::new(3).with_delay(TICK)),
        )
        .await
        .expect("Failed to enqueue");
    let id = job.id().expect("id");

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let flaky = record_handler(move |_job: JobRecord| {
        let counter = counter.clone();
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(JobError::handler("first run fails"))
            } else {
                Ok(json!("ok"))
            }
        }
    });
    let worker = docket
        .worker("w", ["work"])
        .interval(TICK)
        .handler("flaky", flaky)
        .build()
        .expect("Failed to build worker");
    let mut events = worker.events();
    worker.start().expect("Failed to start worker");
    let seen = wait_for(&mut events, |event| {
        is_done(event, id) && event.job().is_some_and(|job| job.status == JobStatus::Complete)
    })
    .await;
    worker.stop().await;

    let names = names_for(&seen, id);
    assert_eq!(names.first(), Some(&"dequeued"));
    assert!(names.contains(&"retried"));
    assert_eq!(names.last(), Some(&"done"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let stored = queue.get(id).await.expect("get").expect("stored");
    assert_eq!(stored.status(), JobStatus::Complete);
    assert_eq!(stored.record().result, Some(json!("ok")));
    assert_eq!(
        stored.record().attempts.as_ref().and_then(|a| a.remaining),
        Some(2)
    );
}
