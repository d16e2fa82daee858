//! Job records and the lifecycle state machine.

use crate::error::{JobError, JobResult};
use crate::metrics::JobMetrics;
use crate::store::JobStore;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Unique job identifier.
///
/// Assigned by the store on insert. Identifiers increase monotonically and
/// break ties between jobs of equal priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(u64);

impl JobId {
    /// Wraps a raw identifier.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw identifier.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for JobId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Job status enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Enqueued but held back until unpaused.
    Paused,
    /// Waiting to be claimed.
    Queued,
    /// Claimed by a worker.
    Dequeued,
    /// Handler succeeded.
    Complete,
    /// Failed with no retries left.
    Failed,
    /// Cancelled before it was claimed.
    Cancelled,
}

impl JobStatus {
    /// Returns true for states that never transition further.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Complete | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Returns true if `cancel` is allowed from this state.
    pub fn is_cancellable(self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Paused)
    }

    /// Returns true if a worker may claim a job in this state.
    pub fn is_claimable(self) -> bool {
        self == JobStatus::Queued
    }

    /// Returns the wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Paused => "paused",
            JobStatus::Queued => "queued",
            JobStatus::Dequeued => "dequeued",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "paused" => Ok(JobStatus::Paused),
            "queued" => Ok(JobStatus::Queued),
            "dequeued" => Ok(JobStatus::Dequeued),
            "complete" => Ok(JobStatus::Complete),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(JobError::Validation(format!("unknown job status: {other}"))),
        }
    }
}

/// Retry budget carried by a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempts {
    /// Total number of attempts allowed.
    pub count: u32,

    /// Attempts left. Absent until the first failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u32>,

    /// Base backoff delay in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,

    /// Backoff strategy name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
}

impl Attempts {
    /// Creates a budget of `count` attempts with no backoff.
    pub fn new(count: u32) -> Self {
        Self {
            count,
            remaining: None,
            delay: None,
            strategy: None,
        }
    }

    /// Sets the base backoff delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Sets the backoff strategy name.
    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }

    /// Attempts left, counting an untouched budget as full.
    pub fn remaining_or_count(&self) -> u32 {
        self.remaining.unwrap_or(self.count)
    }
}

/// Durable representation of one unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Store-assigned identifier. `None` until first persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<JobId>,

    /// Selects which registered handler runs.
    pub name: String,

    /// Handler input.
    #[serde(default)]
    pub params: Value,

    /// Owning queue name.
    pub queue: String,

    /// Retry budget. Absent means no retries.
    #[serde(default)]
    pub attempts: Option<Attempts>,

    /// Maximum handler wall-time in milliseconds.
    #[serde(default)]
    pub timeout: Option<u64>,

    /// Not-before time.
    #[serde(default)]
    pub delay: Option<DateTime<Utc>>,

    /// Higher is claimed first.
    #[serde(default)]
    pub priority: i32,

    /// Lifecycle state.
    pub status: JobStatus,

    /// When the job was last (re-)enqueued.
    #[serde(default)]
    pub enqueued: Option<DateTime<Utc>>,

    /// When the job was claimed.
    #[serde(default)]
    pub dequeued: Option<DateTime<Utc>>,

    /// When the job reached a terminal state.
    #[serde(default)]
    pub ended: Option<DateTime<Utc>>,

    /// Claimant identity.
    #[serde(default)]
    pub worker: Option<String>,

    /// Failure message.
    #[serde(default)]
    pub error: Option<String>,

    /// Failure cause chain.
    #[serde(default)]
    pub stack: Option<String>,

    /// Handler output.
    #[serde(default)]
    pub result: Option<Value>,
}

impl JobRecord {
    /// Creates an unsaved record in the `Queued` state.
    pub fn new(queue: impl Into<String>, name: impl Into<String>, params: Value) -> Self {
        Self {
            id: None,
            name: name.into(),
            params,
            queue: queue.into(),
            attempts: None,
            timeout: None,
            delay: None,
            priority: 0,
            status: JobStatus::Queued,
            enqueued: None,
            dequeued: None,
            ended: None,
            worker: None,
            error: None,
            stack: None,
            result: None,
        }
    }

    /// Returns true if the job may be claimed at `now`.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable() && self.delay.is_some_and(|delay| delay <= now)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> JobResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> JobResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Handle over a [`JobRecord`] and the store it lives in.
///
/// Every status or timestamp change goes through one of the lifecycle
/// methods below, each of which persists the record before returning.
#[derive(Clone)]
pub struct Job {
    record: JobRecord,
    store: Arc<dyn JobStore>,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").field("record", &self.record).finish()
    }
}

impl Job {
    /// Wraps a record.
    pub fn new(record: JobRecord, store: Arc<dyn JobStore>) -> Self {
        Self { record, store }
    }

    /// Returns the underlying record.
    pub fn record(&self) -> &JobRecord {
        &self.record
    }

    /// Consumes the handle, returning the record.
    pub fn into_record(self) -> JobRecord {
        self.record
    }

    /// Returns the job id, if persisted.
    pub fn id(&self) -> Option<JobId> {
        self.record.id
    }

    /// Returns the current status.
    pub fn status(&self) -> JobStatus {
        self.record.status
    }

    /// Places the job in its queue, filling defaults.
    ///
    /// Keeps `Paused` if the job was created paused, otherwise `Queued`.
    pub async fn enqueue(&mut self) -> JobResult<()> {
        self.ensure_not_terminal("enqueue")?;
        self.transition("enqueue", |record| {
            let now = Utc::now();
            if record.delay.is_none() {
                record.delay = Some(now);
            }
            if record.status != JobStatus::Paused {
                record.status = JobStatus::Queued;
            }
            record.enqueued = Some(now);
        })
        .await
    }

    /// Cancels a queued or paused job.
    pub async fn cancel(&mut self) -> JobResult<()> {
        if !self.record.status.is_cancellable() {
            return Err(JobError::InvalidTransition {
                status: self.record.status,
                action: "cancel",
            });
        }
        self.transition("cancel", |record| {
            record.status = JobStatus::Cancelled;
            record.ended = Some(Utc::now());
        })
        .await?;
        JobMetrics::job_cancelled(&self.record.queue, &self.record.name);
        Ok(())
    }

    /// Marks the job as complete with the handler's result.
    pub async fn complete(&mut self, result: Option<Value>) -> JobResult<()> {
        self.ensure_not_terminal("complete")?;
        self.transition("complete", |record| {
            record.status = JobStatus::Complete;
            record.ended = Some(Utc::now());
            record.result = result;
        })
        .await
    }

    /// Marks the job as permanently failed.
    pub async fn fail(&mut self, err: &JobError) -> JobResult<()> {
        self.ensure_not_terminal("fail")?;
        self.transition("fail", |record| {
            record.status = JobStatus::Failed;
            record.ended = Some(Utc::now());
            record.error = Some(err.to_string());
            record.stack = Some(err.trace());
        })
        .await
    }

    /// Re-enqueues the job to run no earlier than `wait` from now.
    pub async fn delay(&mut self, wait: Duration) -> JobResult<()> {
        self.ensure_not_terminal("delay")?;
        self.transition("delay", |record| {
            let now = Utc::now();
            let until = ChronoDuration::from_std(wait)
                .ok()
                .and_then(|wait| now.checked_add_signed(wait))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            record.delay = Some(until);
            record.status = JobStatus::Queued;
            record.enqueued = Some(now);
        })
        .await
    }

    /// Reverts a claimed job to `Queued` without touching its delay.
    pub async fn back(&mut self) -> JobResult<()> {
        self.ensure_not_terminal("revert")?;
        self.transition("revert", |record| {
            record.status = JobStatus::Queued;
            record.dequeued = None;
        })
        .await
    }

    /// Records the attempts left after a failure. Persisted by the
    /// following `delay` or `fail`.
    pub(crate) fn set_remaining(&mut self, remaining: u32) {
        if let Some(attempts) = self.record.attempts.as_mut() {
            attempts.remaining = Some(remaining.min(attempts.count));
        }
    }

    fn ensure_not_terminal(&self, action: &'static str) -> JobResult<()> {
        if self.record.status.is_terminal() {
            return Err(JobError::InvalidTransition {
                status: self.record.status,
                action,
            });
        }
        Ok(())
    }

    /// Applies `change` to a copy of the record and persists it.
    ///
    /// The store write is conditional on the stored status still matching
    /// this handle's. On a mismatch the handle is left untouched and the
    /// error reports the stored status.
    async fn transition<F>(&mut self, action: &'static str, change: F) -> JobResult<()>
    where
        F: FnOnce(&mut JobRecord),
    {
        let expected = self.record.status;
        let mut next = self.record.clone();
        change(&mut next);

        if next.id.is_some() {
            match self.store.save(&next, expected).await {
                Ok(()) => {}
                Err(JobError::Conflict { actual, .. }) => {
                    debug!(
                        job_id = ?next.id,
                        expected = %expected,
                        actual = %actual,
                        action,
                        "Stored job changed under the handle"
                    );
                    return Err(JobError::InvalidTransition {
                        status: actual,
                        action,
                    });
                }
                Err(e) => return Err(e),
            }
        } else {
            next = self.store.insert(next).await?;
        }

        self.record = next;
        debug!(
            job_id = ?self.record.id,
            queue = %self.record.queue,
            status = %self.record.status,
            "Persisted job"
        );
        Ok(())
    }
}
