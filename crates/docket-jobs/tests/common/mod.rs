//! Common test infrastructure for queue and worker integration tests.

#![allow(dead_code)]

use chrono::{Duration as ChronoDuration, Utc};
use docket_jobs::{
    Docket, EnqueueOptions, JobId, JobStatus, MemoryStore, RedisConfig, RedisStore, WorkerEvent,
};
use std::sync::Arc;
use std::time::Duration;
use testcontainers::{runners::AsyncRunner, ContainerAsync};
use testcontainers_modules::redis::Redis;
use tokio::sync::broadcast::{self, error::RecvError};

/// Poll interval used by test workers.
pub const TICK: Duration = Duration::from_millis(10);

/// In-memory client plus a handle on its store for inspection.
pub fn docket() -> (Arc<MemoryStore>, Docket) {
    let store = Arc::new(MemoryStore::new());
    (store.clone(), Docket::new(store))
}

/// Options for a job that is claimable right away.
pub fn ready() -> EnqueueOptions {
    EnqueueOptions::new().at(Utc::now() - ChronoDuration::seconds(1))
}

/// Receives events until `done` returns true for one of them, returning
/// everything seen including that event.
pub async fn wait_for<F>(
    events: &mut broadcast::Receiver<WorkerEvent>,
    mut done: F,
) -> Vec<WorkerEvent>
where
    F: FnMut(&WorkerEvent) -> bool,
{
    let mut seen = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let finished = done(&event);
                    seen.push(event);
                    if finished {
                        break;
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("worker event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for worker event");
    seen
}

/// Drains whatever events are already buffered.
pub fn drain(events: &mut broadcast::Receiver<WorkerEvent>) -> Vec<WorkerEvent> {
    let mut seen = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => seen.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => return seen,
        }
    }
}

/// Names of the events concerning job `id`, in order.
pub fn names_for(events: &[WorkerEvent], id: JobId) -> Vec<&'static str> {
    events
        .iter()
        .filter(|event| event.job().and_then(|job| job.id) == Some(id))
        .map(WorkerEvent::name)
        .collect()
}

/// Returns true for a `Done` event of job `id`.
pub fn is_done(event: &WorkerEvent, id: JobId) -> bool {
    matches!(event, WorkerEvent::Done { job, .. } if job.id == Some(id))
}

/// Number of stored jobs in `status`.
pub fn count_status(store: &MemoryStore, status: JobStatus) -> usize {
    store
        .snapshot()
        .iter()
        .filter(|record| record.status == status)
        .count()
}

/// Test Redis container wrapper.
///
/// Manages a Redis testcontainer lifecycle and provides a connected store.
pub struct TestRedis {
    _container: ContainerAsync<Redis>,
    store: Arc<RedisStore>,
}

impl TestRedis {
    /// Starts a fresh Redis container and connects a store to it.
    pub async fn new() -> Self {
        let container = Redis::default()
            .start()
            .await
            .expect("Failed to start Redis container");

        let port = container
            .get_host_port_ipv4(6379)
            .await
            .expect("Failed to get Redis port");

        let config = RedisConfig {
            url: format!("redis://127.0.0.1:{}", port),
            pool_size: 16,
            connect_timeout_secs: 5,
            key_prefix: "docket:test".to_string(),
        };
        let store = Self::connect_with_retry(&config, 30).await;

        Self {
            _container: container,
            store: Arc::new(store),
        }
    }

    /// Returns the store.
    pub fn store(&self) -> Arc<RedisStore> {
        Arc::clone(&self.store)
    }

    /// Client over the store.
    pub fn docket(&self) -> Docket {
        Docket::new(self.store())
    }

    async fn connect_with_retry(config: &RedisConfig, max_attempts: u32) -> RedisStore {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match RedisStore::connect(config).await {
                Ok(store) => return store,
                Err(e) => {
                    if attempts >= max_attempts {
                        panic!("Failed to connect to Redis after {} attempts: {}", max_attempts, e);
                    }
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}
