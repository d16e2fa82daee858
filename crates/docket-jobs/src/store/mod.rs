//! Storage capability used by queues and jobs.
//!
//! A backend provides five operations. `claim` carries the single critical
//! guarantee of the system: the select and the update it performs must be
//! one atomic step, so that no job is ever handed to two claimants.

mod memory;
pub mod redis;

pub use memory::MemoryStore;
pub use self::redis::{create_pool, RedisKeys, RedisStore};

use crate::error::JobResult;
use crate::filter::JobFilter;
use crate::job::{JobId, JobRecord, JobStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::{Ordering, Reverse};

/// Durable job storage.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Inserts a new record, assigning the next id.
    async fn insert(&self, record: JobRecord) -> JobResult<JobRecord>;

    /// Overwrites a persisted record if its stored status is still
    /// `expected`.
    ///
    /// Fails with [`JobError::Conflict`](crate::error::JobError::Conflict)
    /// when another writer moved the record first, leaving it untouched.
    async fn save(&self, record: &JobRecord, expected: JobStatus) -> JobResult<()>;

    /// Fetches a record by id within a queue.
    async fn find(&self, queue: &str, id: JobId) -> JobResult<Option<JobRecord>>;

    /// Atomically selects the first record matching `request` in claim
    /// order, marks it dequeued, and returns the updated record.
    async fn claim(&self, request: &ClaimRequest) -> JobResult<Option<JobRecord>>;

    /// Moves every record of `queue` in status `from` that matches `filter`
    /// to status `to`. Returns the number of records updated.
    async fn transition_many(
        &self,
        queue: &str,
        filter: &JobFilter,
        from: JobStatus,
        to: JobStatus,
    ) -> JobResult<u64>;
}

/// Parameters of one atomic claim.
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    /// Queue to claim from.
    pub queue: String,

    /// Claimant identity written into the record.
    pub worker: String,

    /// Reference time for delay gating and the `dequeued` stamp.
    pub now: DateTime<Utc>,

    /// Extra conditions on top of readiness.
    pub filter: JobFilter,
}

impl ClaimRequest {
    /// Returns true if `record` is a ready job of this queue that passes
    /// the filter.
    pub fn matches(&self, record: &JobRecord) -> bool {
        record.queue == self.queue && record.is_ready(self.now) && self.filter.matches(record)
    }

    /// Applies the claim update to `record`.
    pub fn apply(&self, record: &mut JobRecord) {
        record.status = JobStatus::Dequeued;
        record.dequeued = Some(self.now);
        record.worker = Some(self.worker.clone());
    }
}

/// Claim order: priority descending, then id ascending.
pub fn claim_order(a: &JobRecord, b: &JobRecord) -> Ordering {
    (Reverse(a.priority), a.id).cmp(&(Reverse(b.priority), b.id))
}
