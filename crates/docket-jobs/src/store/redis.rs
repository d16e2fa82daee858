//! Redis-backed job store.
//!
//! Layout under the configured prefix:
//!
//! - `{prefix}:seq`: id counter
//! - `{prefix}:job:{id}`: the record as JSON
//! - `{prefix}:queued:{queue}`: ready index of `Queued` jobs, all scored 0
//!   and ordered lexicographically by [`claim_member`]
//! - `{prefix}:paused:{queue}`: ids of `Paused` jobs
//!
//! Claims use `WATCH`/`MULTI`/`EXEC` on the ready index and the chosen
//! record. Every transition out of `Queued` removes the member from the
//! index, so any concurrent claim of the same queue aborts and retries.
//! Saves watch the record key and commit only while the stored status is
//! the one the writer expects.

use super::{ClaimRequest, JobStore};
use crate::config::RedisConfig;
use crate::error::{JobError, JobResult};
use crate::filter::JobFilter;
use crate::job::{JobId, JobRecord, JobStatus};
use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{debug, info, trace};

/// Maximum optimistic retries for one claim or one bulk update.
const MAX_CONFLICTS: usize = 32;

/// Ready-index members fetched per round trip while scanning.
const SCAN_PAGE: isize = 64;

/// Create a Redis connection pool and check it with a `PING`.
pub async fn create_pool(config: &RedisConfig) -> JobResult<Pool> {
    info!(url = %config.url, "Creating Redis connection pool for job store...");

    let pool = Config::from_url(&config.url)
        .builder()
        .map_err(|e| JobError::Configuration(format!("Invalid Redis config: {}", e)))?
        .max_size(config.pool_size)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| JobError::Configuration(format!("Failed to create pool: {}", e)))?;

    let timeout = Duration::from_secs(config.connect_timeout_secs);
    let ping = async {
        let mut conn = pool.get().await?;
        redis::cmd("PING").query_async::<String>(&mut *conn).await?;
        Ok::<_, JobError>(())
    };
    tokio::time::timeout(timeout, ping).await.map_err(|_| {
        JobError::Configuration(format!(
            "Redis did not answer within {}s",
            config.connect_timeout_secs
        ))
    })??;

    info!("Redis connection pool created successfully");

    Ok(pool)
}

/// Redis key builder for the job store.
#[derive(Debug, Clone)]
pub struct RedisKeys {
    prefix: String,
}

impl RedisKeys {
    /// Create a new key builder with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Id counter.
    pub fn seq(&self) -> String {
        format!("{}:seq", self.prefix)
    }

    /// Job record key.
    pub fn job(&self, id: JobId) -> String {
        format!("{}:job:{}", self.prefix, id)
    }

    /// Ready index of a queue.
    pub fn queued(&self, queue: &str) -> String {
        format!("{}:queued:{}", self.prefix, queue)
    }

    /// Paused set of a queue.
    pub fn paused(&self, queue: &str) -> String {
        format!("{}:paused:{}", self.prefix, queue)
    }
}

impl Default for RedisKeys {
    fn default() -> Self {
        Self::new("docket:jobs")
    }
}

/// Ready-index member for a job.
///
/// Fixed-width hex sorts lexicographically in claim order: priority
/// descending, then id ascending.
pub fn claim_member(priority: i32, id: JobId) -> String {
    let rank = (i64::from(i32::MAX) - i64::from(priority)) as u32;
    format!("{:08x}:{:016x}", rank, id.get())
}

/// Recovers the job id from a ready-index member.
pub fn member_id(member: &str) -> Option<JobId> {
    let (_, id) = member.split_once(':')?;
    u64::from_str_radix(id, 16).ok().map(JobId::new)
}

/// Redis-backed job store.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
    keys: RedisKeys,
}

impl RedisStore {
    /// Create a store over an existing pool.
    pub fn new(pool: Pool, key_prefix: impl Into<String>) -> Self {
        Self {
            pool,
            keys: RedisKeys::new(key_prefix),
        }
    }

    /// Connect using `config` and create a store.
    pub async fn connect(config: &RedisConfig) -> JobResult<Self> {
        let pool = create_pool(config).await?;
        Ok(Self::new(pool, config.key_prefix.clone()))
    }

    /// Key builder in use.
    pub fn keys(&self) -> &RedisKeys {
        &self.keys
    }

    async fn conn(&self) -> JobResult<Connection> {
        Ok(self.pool.get().await?)
    }

    /// Queues the writes for `record` and its index membership.
    fn stage(&self, pipe: &mut redis::Pipeline, id: JobId, record: &JobRecord) -> JobResult<()> {
        let queued = self.keys.queued(&record.queue);
        let paused = self.keys.paused(&record.queue);
        let member = claim_member(record.priority, id);

        pipe.set(self.keys.job(id), record.to_json()?).ignore();
        match record.status {
            JobStatus::Queued => {
                pipe.zadd(&queued, &member, 0).ignore();
                pipe.srem(&paused, id.get()).ignore();
            }
            JobStatus::Paused => {
                pipe.zrem(&queued, &member).ignore();
                pipe.sadd(&paused, id.get()).ignore();
            }
            _ => {
                pipe.zrem(&queued, &member).ignore();
                pipe.srem(&paused, id.get()).ignore();
            }
        }
        Ok(())
    }

    async fn load(&self, conn: &mut Connection, id: JobId) -> JobResult<Option<JobRecord>> {
        let json: Option<String> = conn.get(self.keys.job(id)).await?;
        json.as_deref().map(JobRecord::from_json).transpose()
    }

    /// Scans the ready index in claim order for the first match.
    async fn first_match(
        &self,
        conn: &mut Connection,
        index: &str,
        request: &ClaimRequest,
    ) -> JobResult<Option<JobRecord>> {
        let mut start = 0isize;
        loop {
            let members: Vec<String> = conn.zrange(index, start, start + SCAN_PAGE - 1).await?;
            if members.is_empty() {
                return Ok(None);
            }

            let ids: Vec<JobId> = members.iter().filter_map(|m| member_id(m)).collect();
            let mut pipe = redis::pipe();
            for id in &ids {
                pipe.get(self.keys.job(*id));
            }
            let values: Vec<Option<String>> = pipe.query_async(&mut *conn).await?;

            for json in values.into_iter().flatten() {
                let record = JobRecord::from_json(&json)?;
                if request.matches(&record) {
                    return Ok(Some(record));
                }
            }

            if (members.len() as isize) < SCAN_PAGE {
                return Ok(None);
            }
            start += SCAN_PAGE;
        }
    }

    async fn unwatch(conn: &mut Connection) -> JobResult<()> {
        redis::cmd("UNWATCH").query_async::<()>(&mut *conn).await?;
        Ok(())
    }

    /// Applies one conditional status change under `WATCH`.
    async fn transition_one(
        &self,
        conn: &mut Connection,
        id: JobId,
        queue: &str,
        filter: &JobFilter,
        from: JobStatus,
        to: JobStatus,
    ) -> JobResult<bool> {
        let key = self.keys.job(id);
        for _ in 0..MAX_CONFLICTS {
            redis::cmd("WATCH").arg(&key).query_async::<()>(&mut *conn).await?;
            let record = match self.load(conn, id).await {
                Ok(Some(record))
                    if record.queue == queue && record.status == from && filter.matches(&record) =>
                {
                    record
                }
                Ok(_) => {
                    Self::unwatch(conn).await?;
                    return Ok(false);
                }
                Err(e) => {
                    let _ = Self::unwatch(conn).await;
                    return Err(e);
                }
            };

            let mut updated = record;
            updated.status = to;
            let mut pipe = redis::pipe();
            pipe.atomic();
            self.stage(&mut pipe, id, &updated)?;
            let committed: Option<()> = pipe.query_async(&mut *conn).await?;
            if committed.is_some() {
                return Ok(true);
            }
        }
        Err(JobError::Storage(format!(
            "job {} kept changing during a bulk update",
            id
        )))
    }
}

#[async_trait]
impl JobStore for RedisStore {
    async fn insert(&self, mut record: JobRecord) -> JobResult<JobRecord> {
        let mut conn = self.conn().await?;
        let seq: u64 = conn.incr(self.keys.seq(), 1u64).await?;
        let id = JobId::new(seq);
        record.id = Some(id);

        let mut pipe = redis::pipe();
        pipe.atomic();
        self.stage(&mut pipe, id, &record)?;
        pipe.query_async::<()>(&mut *conn).await?;

        debug!(job_id = %id, queue = %record.queue, "Inserted job into Redis");
        Ok(record)
    }

    async fn save(&self, record: &JobRecord, expected: JobStatus) -> JobResult<()> {
        let id = record
            .id
            .ok_or_else(|| JobError::Storage("cannot save a record without an id".into()))?;
        let key = self.keys.job(id);
        let mut conn = self.conn().await?;

        for attempt in 0..MAX_CONFLICTS {
            redis::cmd("WATCH").arg(&key).query_async::<()>(&mut *conn).await?;
            let actual = match self.load(&mut conn, id).await {
                Ok(Some(stored)) => stored.status,
                Ok(None) => {
                    Self::unwatch(&mut conn).await?;
                    return Err(JobError::Storage(format!("job {} is not stored", id)));
                }
                Err(e) => {
                    let _ = Self::unwatch(&mut conn).await;
                    return Err(e);
                }
            };
            if actual != expected {
                Self::unwatch(&mut conn).await?;
                return Err(JobError::Conflict {
                    id,
                    expected,
                    actual,
                });
            }

            let mut pipe = redis::pipe();
            pipe.atomic();
            self.stage(&mut pipe, id, record)?;
            let committed: Option<()> = pipe.query_async(&mut *conn).await?;
            if committed.is_some() {
                return Ok(());
            }
            trace!(job_id = %id, attempt, "Save conflicted, retrying");
        }

        Err(JobError::Storage(format!(
            "job {} kept changing during a save",
            id
        )))
    }

    async fn find(&self, queue: &str, id: JobId) -> JobResult<Option<JobRecord>> {
        let mut conn = self.conn().await?;
        Ok(self
            .load(&mut conn, id)
            .await?
            .filter(|record| record.queue == queue))
    }

    async fn claim(&self, request: &ClaimRequest) -> JobResult<Option<JobRecord>> {
        let mut conn = self.conn().await?;
        let index = self.keys.queued(&request.queue);

        for attempt in 0..MAX_CONFLICTS {
            redis::cmd("WATCH").arg(&index).query_async::<()>(&mut *conn).await?;

            let mut record = match self.first_match(&mut conn, &index, request).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    Self::unwatch(&mut conn).await?;
                    return Ok(None);
                }
                Err(e) => {
                    let _ = Self::unwatch(&mut conn).await;
                    return Err(e);
                }
            };
            let Some(id) = record.id else {
                Self::unwatch(&mut conn).await?;
                return Err(JobError::Storage("indexed job has no id".into()));
            };

            // The record itself may change without touching the index, so it
            // is watched too and re-read once the watch is in place.
            redis::cmd("WATCH")
                .arg(self.keys.job(id))
                .query_async::<()>(&mut *conn)
                .await?;
            match self.load(&mut conn, id).await {
                Ok(Some(current)) if current == record => {}
                Ok(_) => {
                    Self::unwatch(&mut conn).await?;
                    trace!(job_id = %id, attempt, "Candidate changed while claiming, rescanning");
                    continue;
                }
                Err(e) => {
                    let _ = Self::unwatch(&mut conn).await;
                    return Err(e);
                }
            }

            request.apply(&mut record);
            let mut pipe = redis::pipe();
            pipe.atomic();
            self.stage(&mut pipe, id, &record)?;
            let committed: Option<()> = pipe.query_async(&mut *conn).await?;

            if committed.is_some() {
                trace!(job_id = %id, worker = %request.worker, attempt, "Claimed job in Redis");
                return Ok(Some(record));
            }
            trace!(queue = %request.queue, attempt, "Claim conflicted, retrying");
        }

        Err(JobError::Storage(format!(
            "claim on queue {} conflicted {} times",
            request.queue, MAX_CONFLICTS
        )))
    }

    async fn transition_many(
        &self,
        queue: &str,
        filter: &JobFilter,
        from: JobStatus,
        to: JobStatus,
    ) -> JobResult<u64> {
        let mut conn = self.conn().await?;

        let candidates: Vec<JobId> = match from {
            JobStatus::Paused => {
                let ids: Vec<u64> = conn.smembers(self.keys.paused(queue)).await?;
                ids.into_iter().map(JobId::new).collect()
            }
            JobStatus::Queued => {
                let members: Vec<String> = conn.zrange(self.keys.queued(queue), 0, -1).await?;
                members.iter().filter_map(|m| member_id(m)).collect()
            }
            other => {
                return Err(JobError::Storage(format!(
                    "bulk transitions from {} are not indexed",
                    other
                )))
            }
        };

        let mut updated = 0u64;
        for id in candidates {
            if self
                .transition_one(&mut conn, id, queue, filter, from, to)
                .await?
            {
                updated += 1;
            }
        }

        debug!(queue = %queue, %from, %to, count = updated, "Bulk status update");
        Ok(updated)
    }
}
