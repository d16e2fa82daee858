//! Worker engine: per-queue polling, concurrency caps, timeouts and retries.

use crate::config::WorkerConfig;
use crate::error::{JobError, JobResult};
use crate::events::WorkerEvent;
use crate::filter::JobFilter;
use crate::job::{Attempts, Job, JobRecord};
use crate::metrics::JobMetrics;
use crate::queue::{DequeueOptions, Queue};
use crate::retry::{RetryDecision, RetryStrategies};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, info_span, trace, warn, Instrument};
use uuid::Uuid;

/// Job handler: receives the claimed record, returns the result to store.
///
/// A `Value::Null` result is stored as no result.
pub type JobHandler =
    Arc<dyn Fn(JobRecord) -> BoxFuture<'static, Result<Value, JobError>> + Send + Sync>;

/// Validation hook: `(queue name, claimed job) -> accept`.
pub type ValidationHook = Arc<dyn Fn(String, JobRecord) -> BoxFuture<'static, bool> + Send + Sync>;

/// Additional query hook, evaluated once per poll.
pub type QueryHook = Arc<dyn Fn() -> BoxFuture<'static, JobResult<JobFilter>> + Send + Sync>;

/// Adapts a closure over typed params into a [`JobHandler`].
///
/// Params that fail to deserialize are a handler error, so they consume a
/// retry attempt like any other failure.
pub fn handler<P, R, F, Fut>(f: F) -> JobHandler
where
    P: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, JobError>> + Send + 'static,
{
    Arc::new(
        move |record: JobRecord| -> BoxFuture<'static, Result<Value, JobError>> {
            match serde_json::from_value::<P>(record.params) {
                Ok(params) => {
                    let fut = f(params);
                    Box::pin(async move {
                        let result = fut.await?;
                        serde_json::to_value(result).map_err(JobError::from)
                    })
                }
                Err(e) => {
                    let message = format!("invalid params for `{}`: {}", record.name, e);
                    Box::pin(async move { Err(JobError::Handler(message)) })
                }
            }
        },
    )
}

/// Adapts a closure over the whole record into a [`JobHandler`].
pub fn record_handler<F, Fut>(f: F) -> JobHandler
where
    F: Fn(JobRecord) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, JobError>> + Send + 'static,
{
    Arc::new(
        move |record: JobRecord| -> BoxFuture<'static, Result<Value, JobError>> {
            f(record).boxed()
        },
    )
}

/// Single-use slot shared by the completion path and the timeout path of
/// one claimed job. Whoever takes the value resolves the job.
pub(crate) struct ResolveOnce<T> {
    slot: Mutex<Option<T>>,
}

impl<T> ResolveOnce<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            slot: Mutex::new(Some(value)),
        }
    }

    /// Returns the value to the first caller only.
    pub(crate) fn take(&self) -> Option<T> {
        self.slot.lock().take()
    }
}

#[derive(Debug, Clone)]
struct Settings {
    interval: Duration,
    max_per_queue: usize,
    min_priority: Option<i32>,
    claim_registered_only: bool,
}

struct Poller {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct WorkerInner {
    name: String,
    settings: Settings,
    validation: Option<ValidationHook>,
    additional_query: Option<QueryHook>,
    handlers: RwLock<HashMap<String, JobHandler>>,
    strategies: RwLock<RetryStrategies>,
    queues: RwLock<HashMap<String, Queue>>,
    pollers: Mutex<HashMap<String, Poller>>,
    in_flight: Mutex<HashMap<String, usize>>,
    working: AtomicBool,
    events: broadcast::Sender<WorkerEvent>,
}

impl WorkerInner {
    fn emit(&self, event: WorkerEvent) {
        trace!(event = event.name(), queue = ?event.queue(), "Worker event");
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn in_flight(&self, queue: &str) -> usize {
        self.in_flight.lock().get(queue).copied().unwrap_or(0)
    }

    fn increment(&self, queue: &str) {
        let count = {
            let mut counters = self.in_flight.lock();
            let count = counters.entry(queue.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        JobMetrics::in_flight(queue, count);
    }

    fn decrement(&self, queue: &str) {
        let count = {
            let mut counters = self.in_flight.lock();
            let count = counters.entry(queue.to_string()).or_insert(0);
            *count = count.saturating_sub(1);
            *count
        };
        JobMetrics::in_flight(queue, count);
    }

    fn handler_names(&self) -> BTreeSet<String> {
        self.handlers.read().keys().cloned().collect()
    }

    /// One poll tick: claim at most one job and dispatch it.
    async fn poll(self: &Arc<Self>, queue_name: &str) {
        if !self.working.load(Ordering::SeqCst) {
            self.emit(WorkerEvent::Stopped);
            return;
        }

        let queue = self.queues.read().get(queue_name).cloned();
        let Some(queue) = queue else {
            trace!(queue = %queue_name, "Queue was dropped, skipping poll");
            return;
        };

        let query = match &self.additional_query {
            Some(hook) => match hook().await {
                Ok(filter) => Some(filter),
                Err(e) => {
                    error!(queue = %queue_name, error = %e, "Additional query hook failed");
                    self.emit(WorkerEvent::Error {
                        queue: queue_name.to_string(),
                        error: Arc::new(e),
                    });
                    return;
                }
            },
            None => None,
        };

        let options = DequeueOptions {
            min_priority: self.settings.min_priority,
            query,
            handler_names: self
                .settings
                .claim_registered_only
                .then(|| self.handler_names()),
        };

        let mut job = match queue.dequeue(&self.name, &options).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                self.emit(WorkerEvent::Empty {
                    queue: queue_name.to_string(),
                });
                return;
            }
            Err(e) => {
                error!(queue = %queue_name, error = %e, "Failed to dequeue job");
                self.emit(WorkerEvent::Error {
                    queue: queue_name.to_string(),
                    error: Arc::new(e),
                });
                return;
            }
        };

        if let Some(validate) = &self.validation {
            if !validate(queue_name.to_string(), job.record().clone()).await {
                warn!(
                    job_id = ?job.id(),
                    queue = %queue_name,
                    "Claimed job rejected by validation, reverting"
                );
                if let Err(e) = job.back().await {
                    self.persist_failed(queue_name, &job, e);
                }
                return;
            }
        }

        self.increment(queue_name);
        self.emit(WorkerEvent::Dequeued {
            queue: queue_name.to_string(),
            job: job.record().clone(),
        });

        let span = info_span!(
            "job",
            job_id = ?job.id(),
            job_name = %job.record().name,
            queue = %queue_name
        );
        let inner = Arc::clone(self);
        tokio::spawn(inner.work(queue_name.to_string(), job).instrument(span));
    }

    /// Runs the handler and races it against the job timeout.
    ///
    /// A timeout does not cancel the handler. Its late outcome is dropped.
    async fn work(self: Arc<Self>, queue_name: String, job: Job) {
        let started = Instant::now();
        let record = job.record().clone();
        let gate = Arc::new(ResolveOnce::new(job));

        let timer = record.timeout.map(|ms| {
            let inner = Arc::clone(&self);
            let gate = Arc::clone(&gate);
            let queue_name = queue_name.clone();
            tokio::spawn(
                async move {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    match gate.take() {
                        Some(job) => {
                            warn!(timeout_ms = ms, "Job timed out");
                            JobMetrics::job_timed_out(&queue_name, &job.record().name);
                            inner
                                .resolve(&queue_name, job, Err(JobError::Timeout(ms)), started)
                                .await;
                        }
                        None => trace!("Job resolved before its timeout"),
                    }
                }
                .in_current_span(),
            )
        });

        let name = record.name.clone();
        let handler = self.handlers.read().get(&name).cloned();
        let outcome = match handler {
            Some(handler) => AssertUnwindSafe(async move { handler(record).await })
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(JobError::Handler(panic_message(panic.as_ref())))),
            None => Err(JobError::Handler(format!(
                "no handler registered for `{}`",
                name
            ))),
        };

        match gate.take() {
            Some(job) => {
                if let Some(timer) = timer {
                    timer.abort();
                }
                self.resolve(&queue_name, job, outcome, started).await;
            }
            None => debug!(
                succeeded = outcome.is_ok(),
                "Discarding handler outcome after timeout"
            ),
        }
    }

    /// Applies the outcome of one claimed job. Runs once per claim.
    async fn resolve(
        &self,
        queue_name: &str,
        mut job: Job,
        outcome: Result<Value, JobError>,
        started: Instant,
    ) {
        match outcome {
            Ok(value) => {
                let result = (!value.is_null()).then_some(value);
                match job.complete(result).await {
                    Ok(()) => {
                        let name = &job.record().name;
                        JobMetrics::job_completed(queue_name, name, started.elapsed());
                        debug!(job_id = ?job.id(), "Job completed");
                        self.emit(WorkerEvent::Complete {
                            queue: queue_name.to_string(),
                            job: job.record().clone(),
                        });
                    }
                    Err(e) => self.persist_failed(queue_name, &job, e),
                }
            }
            Err(err) => self.retry_or_fail(queue_name, &mut job, err, started).await,
        }

        self.decrement(queue_name);
        self.emit(WorkerEvent::Done {
            queue: queue_name.to_string(),
            job: job.into_record(),
        });
    }

    /// Consumes one attempt and either re-enqueues or fails terminally.
    ///
    /// Errors that are not retryable fail the job without consuming an
    /// attempt.
    async fn retry_or_fail(
        &self,
        queue_name: &str,
        job: &mut Job,
        err: JobError,
        started: Instant,
    ) {
        let decision = if err.is_retryable() {
            self.strategies
                .read()
                .decide(job.record().attempts.as_ref())
        } else {
            RetryDecision::Fail { remaining: None }
        };

        match decision {
            RetryDecision::Retry { remaining, wait } => {
                job.set_remaining(remaining);
                warn!(
                    job_id = ?job.id(),
                    error = %err,
                    remaining,
                    wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                    "Job failed, scheduling retry"
                );
                match job.delay(wait).await {
                    Ok(()) => {
                        JobMetrics::job_retried(queue_name, &job.record().name, remaining);
                        self.emit(WorkerEvent::Retried {
                            queue: queue_name.to_string(),
                            job: job.record().clone(),
                            wait,
                            error: Arc::new(err),
                        });
                    }
                    Err(e) => self.persist_failed(queue_name, job, e),
                }
            }
            RetryDecision::Fail { remaining } => {
                if let Some(remaining) = remaining {
                    job.set_remaining(remaining);
                }
                warn!(job_id = ?job.id(), error = %err, "Job failed");
                match job.fail(&err).await {
                    Ok(()) => {
                        JobMetrics::job_failed(
                            queue_name,
                            &job.record().name,
                            error_kind(&err),
                            started.elapsed(),
                        );
                        self.emit(WorkerEvent::Failed {
                            queue: queue_name.to_string(),
                            job: job.record().clone(),
                            error: Arc::new(err),
                        });
                    }
                    Err(e) => self.persist_failed(queue_name, job, e),
                }
            }
        }
    }

    fn persist_failed(&self, queue_name: &str, job: &Job, e: JobError) {
        error!(job_id = ?job.id(), queue = %queue_name, error = %e, "Failed to persist job state");
        self.emit(WorkerEvent::Error {
            queue: queue_name.to_string(),
            error: Arc::new(e),
        });
    }

    /// Starts (or restarts) the repeating poll task of a queue.
    fn spawn_poller(self: &Arc<Self>, queue_name: String) {
        let (shutdown, mut stop_rx) = watch::channel(false);
        let inner = Arc::clone(self);
        let name = queue_name.clone();
        let span = info_span!("poller", worker = %self.name, queue = %queue_name);

        let handle = tokio::spawn(
            async move {
                let period = inner.settings.interval;
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                debug!("Poller started");

                loop {
                    tokio::select! {
                        biased;
                        _ = stop_rx.changed() => break,
                        _ = ticker.tick() => {
                            if inner.in_flight(&name) >= inner.settings.max_per_queue {
                                trace!("Queue at capacity, skipping tick");
                                continue;
                            }
                            inner.poll(&name).await;
                        }
                    }
                }

                debug!("Poller exited");
            }
            .instrument(span),
        );

        let previous = self
            .pollers
            .lock()
            .insert(queue_name, Poller { shutdown, handle });
        if let Some(previous) = previous {
            let _ = previous.shutdown.send(true);
        }
    }

    fn stop_poller(&self, queue_name: &str) -> Option<Poller> {
        let poller = self.pollers.lock().remove(queue_name)?;
        let _ = poller.shutdown.send(true);
        Some(poller)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("handler panicked: {}", message)
    } else {
        "handler panicked".to_string()
    }
}

fn error_kind(err: &JobError) -> &'static str {
    match err {
        JobError::Timeout(_) => "timeout",
        JobError::Handler(_) => "handler",
        JobError::Serialization(_) => "serialization",
        _ => "other",
    }
}

/// Polls queues and runs claimed jobs through registered handlers.
///
/// Each queue gets its own repeating poll task. A tick is skipped while the
/// queue already has `max_per_queue` jobs in flight; otherwise it claims at
/// most one job and hands it to a spawned task, so one poller can keep
/// several jobs running.
pub struct Worker {
    inner: Arc<WorkerInner>,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.inner.name)
            .field("settings", &self.inner.settings)
            .field("queues", &self.queue_names())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Worker {
    /// Creates a builder with default settings.
    pub fn builder() -> WorkerBuilder {
        WorkerBuilder::new()
    }

    /// Claimant identity written into claimed jobs.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns true between `start` and `stop`.
    pub fn is_running(&self) -> bool {
        self.inner.working.load(Ordering::SeqCst)
    }

    /// Subscribes to worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.inner.events.subscribe()
    }

    /// Registers or replaces the handler for a job name.
    pub fn register(&self, name: impl Into<String>, handler: JobHandler) {
        let name = name.into();
        info!(worker = %self.inner.name, job_name = %name, "Registered job handler");
        self.inner.handlers.write().insert(name, handler);
    }

    /// Registers several handlers at once.
    pub fn register_all<S, I>(&self, handlers: I)
    where
        S: Into<String>,
        I: IntoIterator<Item = (S, JobHandler)>,
    {
        for (name, handler) in handlers {
            self.register(name, handler);
        }
    }

    /// Registers or replaces a retry strategy.
    pub fn register_strategy<F>(&self, name: impl Into<String>, strategy: F)
    where
        F: Fn(&Attempts) -> u64 + Send + Sync + 'static,
    {
        let name = name.into();
        info!(worker = %self.inner.name, strategy = %name, "Registered retry strategy");
        self.inner.strategies.write().register(name, strategy);
    }

    /// Starts one poll task per registered queue.
    pub fn start(&self) -> JobResult<()> {
        if self.inner.working.swap(true, Ordering::SeqCst) {
            return Err(JobError::Worker(format!(
                "worker {} is already running",
                self.inner.name
            )));
        }

        let names = self.queue_names();
        info!(
            worker = %self.inner.name,
            queues = ?names,
            interval_ms =
                u64::try_from(self.inner.settings.interval.as_millis()).unwrap_or(u64::MAX),
            max_per_queue = self.inner.settings.max_per_queue,
            "Starting worker"
        );
        for name in names {
            self.inner.spawn_poller(name);
        }
        Ok(())
    }

    /// Stops polling and waits for in-progress ticks to finish.
    ///
    /// Jobs already dispatched keep running to resolution. Emits `Stopped`
    /// once every poll task has exited.
    pub async fn stop(&self) {
        info!(worker = %self.inner.name, "Stopping worker...");
        self.inner.working.store(false, Ordering::SeqCst);

        let pollers: Vec<Poller> = {
            let mut pollers = self.inner.pollers.lock();
            pollers.drain().map(|(_, poller)| poller).collect()
        };
        for poller in &pollers {
            let _ = poller.shutdown.send(true);
        }
        for poller in pollers {
            if let Err(e) = poller.handle.await {
                if e.is_panic() {
                    error!(worker = %self.inner.name, error = %e, "Poller panicked");
                }
            }
        }

        info!(worker = %self.inner.name, "Worker stopped");
        self.inner.emit(WorkerEvent::Stopped);
    }

    /// Adds or replaces a queue. Polling starts at once if the worker runs.
    pub fn add_queue(&self, name: impl Into<String>, queue: Queue) {
        let name = name.into();
        self.inner.queues.write().insert(name.clone(), queue);
        info!(worker = %self.inner.name, queue = %name, "Added queue");
        if self.is_running() {
            self.inner.spawn_poller(name);
        }
    }

    /// Stops polling a queue and forgets it.
    pub fn drop_queue(&self, name: &str) -> Option<Queue> {
        self.inner.stop_poller(name);
        let removed = self.inner.queues.write().remove(name);
        if removed.is_some() {
            info!(worker = %self.inner.name, queue = %name, "Dropped queue");
        }
        removed
    }

    /// Returns the queue registered under `name`.
    pub fn get_queue(&self, name: &str) -> Option<Queue> {
        self.inner.queues.read().get(name).cloned()
    }

    /// Names of registered queues, sorted.
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.queues.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Jobs of `queue` claimed but not yet resolved.
    pub fn in_flight(&self, queue: &str) -> usize {
        self.inner.in_flight(queue)
    }

    /// Runs a single poll tick for `queue` now.
    ///
    /// Unlike the scheduled ticks this does not check the in-flight cap.
    pub async fn poll(&self, queue: &str) {
        self.inner.poll(queue).await;
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.inner.working.store(false, Ordering::SeqCst);
        for (_, poller) in self.inner.pollers.lock().drain() {
            let _ = poller.shutdown.send(true);
        }
    }
}

/// Builder for [`Worker`].
pub struct WorkerBuilder {
    name: Option<String>,
    queues: HashMap<String, Queue>,
    interval: Duration,
    max_per_queue: usize,
    min_priority: Option<i32>,
    event_capacity: usize,
    claim_registered_only: bool,
    validation: Option<ValidationHook>,
    additional_query: Option<QueryHook>,
    handlers: HashMap<String, JobHandler>,
    strategies: RetryStrategies,
}

impl Default for WorkerBuilder {
    fn default() -> Self {
        Self::from_config(&WorkerConfig::default())
    }
}

impl WorkerBuilder {
    /// Creates a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder from configuration.
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            name: None,
            queues: HashMap::new(),
            interval: config.interval(),
            max_per_queue: config.max_per_queue,
            min_priority: config.min_priority,
            event_capacity: config.event_capacity,
            claim_registered_only: true,
            validation: None,
            additional_query: None,
            handlers: HashMap::new(),
            strategies: RetryStrategies::new(),
        }
    }

    /// Sets the claimant identity. Defaults to `worker-<uuid>`.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Polls `queue` under its own name.
    pub fn queue(mut self, queue: Queue) -> Self {
        self.queues.insert(queue.name().to_string(), queue);
        self
    }

    /// Polls every queue in `queues`.
    pub fn queues(mut self, queues: impl IntoIterator<Item = Queue>) -> Self {
        for queue in queues {
            self = self.queue(queue);
        }
        self
    }

    /// Time between poll ticks of one queue.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Maximum jobs in flight per queue.
    pub fn max_per_queue(mut self, max: usize) -> Self {
        self.max_per_queue = max;
        self
    }

    /// Only claim jobs at or above `priority`.
    pub fn min_priority(mut self, priority: i32) -> Self {
        self.min_priority = Some(priority);
        self
    }

    /// Capacity of the event channel.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Whether claims are restricted to job names with a registered
    /// handler. On by default.
    pub fn claim_registered_only(mut self, enabled: bool) -> Self {
        self.claim_registered_only = enabled;
        self
    }

    /// Hook deciding whether a claimed job may run. A rejected job is
    /// reverted to `Queued` without consuming an attempt.
    pub fn validation<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(String, JobRecord) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let hook: ValidationHook = Arc::new(
            move |queue: String, job: JobRecord| -> BoxFuture<'static, bool> {
                f(queue, job).boxed()
            },
        );
        self.validation = Some(hook);
        self
    }

    /// Hook returning an extra filter for every claim.
    pub fn additional_query<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobResult<JobFilter>> + Send + 'static,
    {
        let hook: QueryHook =
            Arc::new(move || -> BoxFuture<'static, JobResult<JobFilter>> { f().boxed() });
        self.additional_query = Some(hook);
        self
    }

    /// Registers a handler.
    pub fn handler(mut self, name: impl Into<String>, handler: JobHandler) -> Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    /// Registers a retry strategy.
    pub fn strategy<F>(mut self, name: impl Into<String>, strategy: F) -> Self
    where
        F: Fn(&Attempts) -> u64 + Send + Sync + 'static,
    {
        self.strategies.register(name, strategy);
        self
    }

    /// Builds the worker. Nothing is polled until [`Worker::start`].
    pub fn build(self) -> JobResult<Worker> {
        if self.interval.is_zero() {
            return Err(JobError::Configuration(
                "worker interval must be greater than 0".into(),
            ));
        }
        if self.max_per_queue == 0 {
            return Err(JobError::Configuration(
                "max_per_queue must be at least 1".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(JobError::Configuration(
                "event_capacity must be at least 1".into(),
            ));
        }

        let name = self
            .name
            .unwrap_or_else(|| format!("worker-{}", Uuid::new_v4()));
        let (events, _) = broadcast::channel(self.event_capacity);

        Ok(Worker {
            inner: Arc::new(WorkerInner {
                name,
                settings: Settings {
                    interval: self.interval,
                    max_per_queue: self.max_per_queue,
                    min_priority: self.min_priority,
                    claim_registered_only: self.claim_registered_only,
                },
                validation: self.validation,
                additional_query: self.additional_query,
                handlers: RwLock::new(self.handlers),
                strategies: RwLock::new(self.strategies),
                queues: RwLock::new(self.queues),
                pollers: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                working: AtomicBool::new(false),
                events,
            }),
        })
    }
}
