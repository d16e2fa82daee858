//! Queue binding and the atomic claim protocol.

use crate::error::{JobError, JobResult};
use crate::filter::JobFilter;
use crate::job::{Attempts, Job, JobId, JobRecord, JobStatus};
use crate::metrics::JobMetrics;
use crate::store::{ClaimRequest, JobStore};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Name used when a queue is created without one.
pub const DEFAULT_QUEUE: &str = "default";

/// Options for [`Queue::enqueue`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnqueueOptions {
    /// Not-before time. Defaults to the enqueue time.
    pub delay: Option<DateTime<Utc>>,

    /// Claim priority. Defaults to 0.
    pub priority: Option<i32>,

    /// Retry budget.
    pub attempts: Option<Attempts>,

    /// Maximum handler wall-time.
    pub timeout: Option<Duration>,

    /// Create the job paused.
    pub paused: bool,
}

impl EnqueueOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay the job by `delay` from now.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(after(delay));
        self
    }

    /// Hold the job until `at`.
    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.delay = Some(at);
        self
    }

    /// Set the claim priority.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Set the retry budget.
    pub fn attempts(mut self, attempts: Attempts) -> Self {
        self.attempts = Some(attempts);
        self
    }

    /// Set the handler timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Create the job paused.
    pub fn paused(mut self) -> Self {
        self.paused = true;
        self
    }

    /// Parses host-supplied JSON options.
    ///
    /// Accepted keys: `delay` (RFC 3339 timestamp, or milliseconds from now),
    /// `priority`, `attempts` (an object with `count`, optional `delay` in ms
    /// and `strategy`), `timeout` (ms) and `paused`. Integers may also be
    /// given as decimal strings. `null` yields empty options.
    pub fn from_json(value: &Value) -> JobResult<Self> {
        let options = match value {
            Value::Null => return Ok(Self::default()),
            Value::Object(options) => options,
            _ => return Err(JobError::Validation("options must be an object".into())),
        };

        let mut parsed = Self::default();

        if let Some(delay) = present(options, "delay") {
            parsed.delay = Some(parse_delay(delay)?);
        }

        if let Some(priority) = present(options, "priority") {
            let priority = match priority {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.trim().parse::<i64>().ok(),
                _ => None,
            }
            .and_then(|p| i32::try_from(p).ok())
            .ok_or_else(|| JobError::Validation("priority must be an integer".into()))?;
            parsed.priority = Some(priority);
        }

        if let Some(attempts) = present(options, "attempts") {
            parsed.attempts = Some(parse_attempts(attempts)?);
        }

        if let Some(timeout) = present(options, "timeout") {
            parsed.timeout = Some(Duration::from_millis(integer(timeout, "timeout")?));
        }

        if let Some(paused) = present(options, "paused") {
            parsed.paused = paused
                .as_bool()
                .ok_or_else(|| JobError::Validation("paused must be a boolean".into()))?;
        }

        Ok(parsed)
    }
}

/// `now + wait`, saturating at the latest representable instant.
fn after(wait: Duration) -> DateTime<Utc> {
    let now = Utc::now();
    ChronoDuration::from_std(wait)
        .ok()
        .and_then(|wait| now.checked_add_signed(wait))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn parse_delay(value: &Value) -> JobResult<DateTime<Utc>> {
    if let Value::String(s) = value {
        if let Ok(at) = DateTime::parse_from_rfc3339(s) {
            return Ok(at.with_timezone(&Utc));
        }
    }
    Ok(after(Duration::from_millis(integer(value, "delay")?)))
}

/// Returns the value under `key` unless it is missing or `null`.
fn present<'a>(options: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    options.get(key).filter(|v| !v.is_null())
}

/// Reads a non-negative integer, accepting decimal strings.
fn integer(value: &Value, field: &str) -> JobResult<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
    .ok_or_else(|| JobError::Validation(format!("{field} must be a non-negative integer")))
}

fn parse_attempts(value: &Value) -> JobResult<Attempts> {
    let Value::Object(attempts) = value else {
        return Err(JobError::Validation("attempts must be an object".into()));
    };

    let count = present(attempts, "count")
        .ok_or_else(|| JobError::Validation("attempts.count is required".into()))
        .and_then(|count| integer(count, "attempts.count"))?;
    let count = u32::try_from(count)
        .map_err(|_| JobError::Validation("attempts.count is out of range".into()))?;

    let mut parsed = Attempts::new(count);
    if let Some(delay) = present(attempts, "delay") {
        parsed.delay = Some(integer(delay, "attempts.delay")?);
        parsed.strategy = match present(attempts, "strategy") {
            None => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                return Err(JobError::Validation(
                    "attempts.strategy must be a string".into(),
                ))
            }
        };
    }
    Ok(parsed)
}

/// Normalizes a caller-built budget: fresh `remaining`, strategy only with
/// a delay.
fn normalize_attempts(mut attempts: Attempts) -> Attempts {
    attempts.remaining = None;
    if attempts.delay.is_none() {
        attempts.strategy = None;
    }
    attempts
}

/// Options for [`Queue::dequeue`].
#[derive(Debug, Clone, Default)]
pub struct DequeueOptions {
    /// Claim floor.
    pub min_priority: Option<i32>,

    /// Extra caller-supplied filter.
    pub query: Option<JobFilter>,

    /// Restrict claims to jobs with these names.
    pub handler_names: Option<BTreeSet<String>>,
}

/// Binding of a queue name to a job store.
///
/// Holds no job data. Every read and write is a store round trip scoped by
/// `queue == name`.
#[derive(Clone)]
pub struct Queue {
    store: Arc<dyn JobStore>,
    name: String,
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue").field("name", &self.name).finish()
    }
}

impl Queue {
    /// Binds `name` to `store`.
    pub fn new(store: Arc<dyn JobStore>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
        }
    }

    /// Queue name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backing store.
    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Creates and persists a job.
    pub async fn enqueue(
        &self,
        name: impl Into<String>,
        params: Value,
        options: EnqueueOptions,
    ) -> JobResult<Job> {
        let mut record = JobRecord::new(self.name.clone(), name, params);
        record.attempts = options.attempts.map(normalize_attempts);
        record.timeout = options
            .timeout
            .map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX));
        record.delay = options.delay;
        record.priority = options.priority.unwrap_or(0);
        if options.paused {
            record.status = JobStatus::Paused;
        }

        let mut job = Job::new(record, self.store.clone());
        job.enqueue().await?;

        JobMetrics::job_enqueued(&self.name, &job.record().name);
        debug!(
            job_id = ?job.id(),
            queue = %self.name,
            job_name = %job.record().name,
            priority = job.record().priority,
            status = %job.status(),
            "Enqueued job"
        );
        Ok(job)
    }

    /// Parses `options` and enqueues. Malformed options fail before any
    /// store access.
    pub async fn enqueue_json(
        &self,
        name: impl Into<String>,
        params: Value,
        options: &Value,
    ) -> JobResult<Job> {
        let options = EnqueueOptions::from_json(options)?;
        self.enqueue(name, params, options).await
    }

    /// Fetches a job of this queue by id.
    pub async fn get(&self, id: JobId) -> JobResult<Option<Job>> {
        Ok(self
            .store
            .find(&self.name, id)
            .await?
            .map(|record| Job::new(record, self.store.clone())))
    }

    /// Moves every paused job matching `filter` to `Queued`.
    pub async fn unpause(&self, filter: &JobFilter) -> JobResult<u64> {
        let updated = self
            .store
            .transition_many(&self.name, filter, JobStatus::Paused, JobStatus::Queued)
            .await?;
        debug!(queue = %self.name, count = updated, "Unpaused jobs");
        Ok(updated)
    }

    /// Atomically claims the next ready job for `worker_id`.
    ///
    /// Ready means `Queued`, in this queue, and past its delay. Among ready
    /// jobs passing `options`, the highest priority wins, then the lowest id.
    pub async fn dequeue(
        &self,
        worker_id: &str,
        options: &DequeueOptions,
    ) -> JobResult<Option<Job>> {
        let mut filter = JobFilter::new();
        if let Some(min) = options.min_priority {
            filter = filter.min_priority(min);
        }
        if let Some(names) = &options.handler_names {
            filter = filter.names(names.iter().cloned());
        }
        if let Some(query) = &options.query {
            filter = filter.and(query.clone());
        }

        let request = ClaimRequest {
            queue: self.name.clone(),
            worker: worker_id.to_string(),
            now: Utc::now(),
            filter,
        };

        match self.store.claim(&request).await? {
            Some(record) => {
                JobMetrics::job_dequeued(&self.name, &record.name);
                debug!(
                    job_id = ?record.id,
                    queue = %self.name,
                    worker_id = %worker_id,
                    "Dequeued job"
                );
                Ok(Some(Job::new(record, self.store.clone())))
            }
            None => {
                trace!(queue = %self.name, "No ready job");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn queue(name: &str) -> (Arc<MemoryStore>, Queue) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), Queue::new(store, name))
    }

    fn ready() -> EnqueueOptions {
        EnqueueOptions::new().at(Utc::now() - ChronoDuration::seconds(1))
    }

    #[tokio::test]
    async fn test_enqueue_defaults() {
        let (_, queue) = queue("mail");
        let job = queue.enqueue("send", json!({"to": "x"}), EnqueueOptions::new()).await.unwrap();
        let record = job.record();
        assert_eq!(record.queue, "mail");
        assert_eq!(record.status, JobStatus::Queued);
        assert_eq!(record.priority, 0);
        assert!(record.delay.is_some());
        assert!(record.attempts.is_none());
    }

    #[tokio::test]
    async fn test_enqueue_normalizes_attempts() {
        let (_, queue) = queue("mail");
        let mut attempts = Attempts::new(3).with_strategy("exponential");
        attempts.remaining = Some(1);
        let job = queue
            .enqueue("send", Value::Null, EnqueueOptions::new().attempts(attempts))
            .await
            .unwrap();
        assert_eq!(job.record().attempts, Some(Attempts::new(3)));
    }

    #[tokio::test]
    async fn test_enqueue_paused_is_not_claimable_until_unpaused() {
        let (_, queue) = queue("mail");
        let job = queue.enqueue("send", Value::Null, ready().paused()).await.unwrap();
        assert_eq!(job.status(), JobStatus::Paused);
        assert!(queue.dequeue("w", &DequeueOptions::default()).await.unwrap().is_none());

        assert_eq!(queue.unpause(&JobFilter::new()).await.unwrap(), 1);
        let claimed = queue.dequeue("w", &DequeueOptions::default()).await.unwrap();
        assert_eq!(claimed.unwrap().id(), job.id());
    }

    #[tokio::test]
    async fn test_unpause_respects_filter() {
        let (_, queue) = queue("mail");
        queue.enqueue("a", Value::Null, ready().paused()).await.unwrap();
        queue.enqueue("b", Value::Null, ready().paused()).await.unwrap();
        assert_eq!(queue.unpause(&JobFilter::new().name("b")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_priority_then_fifo_order() {
        let (_, queue) = queue("q");
        let mut ids = Vec::new();
        for priority in [5, 1, 5, 3] {
            let job = queue
                .enqueue("n", Value::Null, ready().priority(priority))
                .await
                .unwrap();
            ids.push(job.id().unwrap());
        }

        let mut order = Vec::new();
        while let Some(job) = queue.dequeue("w", &DequeueOptions::default()).await.unwrap() {
            order.push((job.record().priority, job.id().unwrap()));
        }
        assert_eq!(
            order,
            vec![(5, ids[0]), (5, ids[2]), (3, ids[3]), (1, ids[1])]
        );
    }

    #[tokio::test]
    async fn test_dequeue_sets_claim_fields() {
        let (_, queue) = queue("q");
        queue.enqueue("n", Value::Null, ready()).await.unwrap();
        let job = queue.dequeue("worker-1", &DequeueOptions::default()).await.unwrap().unwrap();
        assert_eq!(job.status(), JobStatus::Dequeued);
        assert_eq!(job.record().worker.as_deref(), Some("worker-1"));
        assert!(job.record().dequeued.is_some());
    }

    #[tokio::test]
    async fn test_dequeue_respects_delay() {
        let (_, queue) = queue("q");
        queue
            .enqueue("n", Value::Null, EnqueueOptions::new().delay(Duration::from_secs(10)))
            .await
            .unwrap();
        assert!(queue.dequeue("w", &DequeueOptions::default()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dequeue_filters() {
        let (_, queue) = queue("q");
        queue.enqueue("low", Value::Null, ready().priority(1)).await.unwrap();
        queue.enqueue("other", json!({"tenant": "b"}), ready().priority(9)).await.unwrap();
        queue.enqueue("mine", json!({"tenant": "a"}), ready().priority(5)).await.unwrap();

        let options = DequeueOptions {
            min_priority: Some(2),
            query: Some(JobFilter::new().param("tenant", "a")),
            handler_names: Some(BTreeSet::from(["mine".to_string(), "other".to_string()])),
        };
        let job = queue.dequeue("w", &options).await.unwrap().unwrap();
        assert_eq!(job.record().name, "mine");
        assert!(queue.dequeue("w", &options).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_is_scoped_to_queue() {
        let (store, queue) = queue("q");
        let job = queue.enqueue("n", Value::Null, EnqueueOptions::new()).await.unwrap();
        let other = Queue::new(store, "elsewhere");
        assert!(queue.get(job.id().unwrap()).await.unwrap().is_some());
        assert!(other.get(job.id().unwrap()).await.unwrap().is_none());
    }

    #[test]
    fn test_options_from_json() {
        let options = EnqueueOptions::from_json(&json!({
            "priority": 3,
            "attempts": {"count": "5", "delay": 250, "strategy": "exponential"},
            "timeout": "1500",
            "paused": true
        }))
        .unwrap();
        assert_eq!(options.priority, Some(3));
        assert_eq!(
            options.attempts,
            Some(Attempts {
                count: 5,
                remaining: None,
                delay: Some(250),
                strategy: Some("exponential".into()),
            })
        );
        assert_eq!(options.timeout, Some(Duration::from_millis(1500)));
        assert!(options.paused);
    }

    #[test]
    fn test_options_strategy_requires_delay() {
        let options =
            EnqueueOptions::from_json(&json!({"attempts": {"count": 2, "strategy": "exponential"}}))
                .unwrap();
        assert_eq!(options.attempts, Some(Attempts::new(2)));
    }

    #[test]
    fn test_options_delay_forms() {
        let at = EnqueueOptions::from_json(&json!({"delay": "2030-01-01T00:00:00Z"})).unwrap();
        assert_eq!(at.delay.unwrap().to_rfc3339(), "2030-01-01T00:00:00+00:00");

        let before = Utc::now();
        let relative = EnqueueOptions::from_json(&json!({"delay": 5000})).unwrap();
        assert!(relative.delay.unwrap() >= before + ChronoDuration::seconds(5));
    }

    #[test]
    fn test_options_rejects_malformed() {
        for bad in [
            json!("fast"),
            json!({"attempts": 3}),
            json!({"attempts": {"delay": 10}}),
            json!({"attempts": {"count": "many"}}),
            json!({"attempts": {"count": 2, "delay": 5, "strategy": 7}}),
            json!({"timeout": -1}),
            json!({"priority": 1.5}),
            json!({"paused": "yes"}),
            json!({"delay": "tomorrow"}),
        ] {
            let err = EnqueueOptions::from_json(&bad).unwrap_err();
            assert!(matches!(err, JobError::Validation(_)), "{bad}");
        }
    }

    #[tokio::test]
    async fn test_enqueue_json_validates_before_store_access() {
        let (store, queue) = queue("q");
        let err = queue
            .enqueue_json("n", Value::Null, &json!({"attempts": "three"}))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Validation(_)));
        assert!(store.is_empty());
    }
}
