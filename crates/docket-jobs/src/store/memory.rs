//! In-process job store.

use super::{claim_order, ClaimRequest, JobStore};
use crate::error::{JobError, JobResult};
use crate::filter::JobFilter;
use crate::job::{JobId, JobRecord, JobStatus};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::trace;

/// Job store backed by a mutex-guarded map.
///
/// Every operation runs under one lock, which makes `claim` atomic with
/// respect to any number of concurrent claimants in the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    seq: u64,
    jobs: BTreeMap<JobId, JobRecord>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every stored record in id order.
    pub fn snapshot(&self) -> Vec<JobRecord> {
        self.state.lock().jobs.values().cloned().collect()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.state.lock().jobs.len()
    }

    /// Returns true if nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert(&self, mut record: JobRecord) -> JobResult<JobRecord> {
        let mut state = self.state.lock();
        state.seq += 1;
        let id = JobId::new(state.seq);
        record.id = Some(id);
        state.jobs.insert(id, record.clone());
        Ok(record)
    }

    async fn save(&self, record: &JobRecord, expected: JobStatus) -> JobResult<()> {
        let id = record
            .id
            .ok_or_else(|| JobError::Storage("cannot save a record without an id".into()))?;
        let mut state = self.state.lock();
        let stored = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| JobError::Storage(format!("job {} is not stored", id)))?;
        if stored.status != expected {
            return Err(JobError::Conflict {
                id,
                expected,
                actual: stored.status,
            });
        }
        *stored = record.clone();
        Ok(())
    }

    async fn find(&self, queue: &str, id: JobId) -> JobResult<Option<JobRecord>> {
        Ok(self
            .state
            .lock()
            .jobs
            .get(&id)
            .filter(|record| record.queue == queue)
            .cloned())
    }

    async fn claim(&self, request: &ClaimRequest) -> JobResult<Option<JobRecord>> {
        let mut state = self.state.lock();
        let selected = state
            .jobs
            .values()
            .filter(|record| request.matches(record))
            .min_by(|a, b| claim_order(a, b))
            .and_then(|record| record.id);

        let Some(id) = selected else {
            return Ok(None);
        };
        let Some(record) = state.jobs.get_mut(&id) else {
            return Ok(None);
        };
        request.apply(record);
        trace!(job_id = %id, worker = %request.worker, "Claimed job in memory store");
        Ok(Some(record.clone()))
    }

    async fn transition_many(
        &self,
        queue: &str,
        filter: &JobFilter,
        from: JobStatus,
        to: JobStatus,
    ) -> JobResult<u64> {
        let mut state = self.state.lock();
        let mut updated = 0u64;
        for record in state.jobs.values_mut() {
            if record.queue == queue && record.status == from && filter.matches(record) {
                record.status = to;
                updated += 1;
            }
        }
        Ok(updated)
    }
}
