//! Docket Jobs - Persistent Job Queue Engine
//!
//! Producers enqueue jobs into named queues backed by a shared store.
//! Workers poll those queues, atomically claim jobs so that no two workers
//! ever run the same job, and resolve each job to success, permanent
//! failure, or a delayed retry.
//!
//! - Job lifecycle state machine with persisted transitions
//! - Atomic claim ordered by priority, then FIFO by id
//! - Per-queue polling with in-flight caps
//! - Handler timeouts resolved exactly once
//! - Named retry strategies (`linear`, `exponential`, custom)
//! - In-memory and Redis stores
//!
//! # Architecture
//!
//! ```text
//! Producer ──► Queue::enqueue ──► JobStore::insert
//!                                      │
//!            Worker poll tick (one task per queue)
//!                                      │
//!                                      ▼
//!                   Queue::dequeue ──► JobStore::claim (atomic)
//!                                      │
//!                                      ▼
//!              handler ◄── race ──► timeout
//!                  │
//!                  ▼
//!     Job::complete │ Job::delay (retry) │ Job::fail ──► WorkerEvent
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use docket_jobs::prelude::*;
//! use serde::Deserialize;
//! use std::time::Duration;
//!
//! #[derive(Deserialize)]
//! struct SendEmail {
//!     to: String,
//! }
//!
//! let docket = Docket::in_memory();
//!
//! docket
//!     .queue("emails")
//!     .enqueue(
//!         "send_email",
//!         serde_json::json!({"to": "user@example.com"}),
//!         EnqueueOptions::new()
//!             .priority(5)
//!             .attempts(Attempts::new(3).with_delay(Duration::from_secs(1)))
//!             .timeout(Duration::from_secs(30)),
//!     )
//!     .await?;
//!
//! let worker = docket
//!     .worker("mailer", ["emails"])
//!     .handler("send_email", handler(|job: SendEmail| async move {
//!         println!("sending to {}", job.to);
//!         Ok::<_, JobError>(())
//!     }))
//!     .build()?;
//!
//! worker.start()?;
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod filter;
pub mod job;
pub mod metrics;
pub mod queue;
pub mod retry;
pub mod store;
pub mod worker;

pub use client::Docket;
pub use config::{JobsConfig, RedisConfig, WorkerConfig};
pub use error::{JobError, JobResult};
pub use events::WorkerEvent;
pub use filter::JobFilter;
pub use job::{Attempts, Job, JobId, JobRecord, JobStatus};
pub use metrics::{register_metrics, JobMetrics};
pub use queue::{DequeueOptions, EnqueueOptions, Queue, DEFAULT_QUEUE};
pub use retry::{BackoffFn, RetryDecision, RetryStrategies};
pub use store::{ClaimRequest, JobStore, MemoryStore, RedisStore};
pub use worker::{handler, record_handler, JobHandler, Worker, WorkerBuilder};

/// Re-export commonly used items
pub mod prelude {
    pub use crate::client::Docket;
    pub use crate::job::{Attempts, JobStatus};
    pub use crate::queue::{EnqueueOptions, Queue};
    pub use crate::worker::{handler, Worker};
    pub use crate::{JobError, JobFilter, JobId, JobResult, WorkerEvent};
}
