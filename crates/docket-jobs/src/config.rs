//! Job queue configuration.

use crate::error::{JobError, JobResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the job queue system.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Redis connection configuration.
    #[serde(default)]
    pub redis: RedisConfig,

    /// Worker configuration.
    #[serde(default)]
    pub worker: WorkerConfig,
}

impl JobsConfig {
    /// Rejects values no worker or store can run with.
    pub fn validate(&self) -> JobResult<()> {
        self.redis.validate()?;
        self.worker.validate()
    }
}

/// Redis connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL.
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Key prefix for all job-related keys.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_pool_size(),
            connect_timeout_secs: default_connect_timeout(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl RedisConfig {
    fn validate(&self) -> JobResult<()> {
        if self.url.trim().is_empty() {
            return Err(JobError::Configuration("redis.url must not be empty".into()));
        }
        if self.pool_size == 0 {
            return Err(JobError::Configuration(
                "redis.pool_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_pool_size() -> usize {
    10
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_key_prefix() -> String {
    "docket:jobs".to_string()
}

/// Worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Milliseconds between poll ticks, per queue.
    #[serde(default = "default_interval")]
    pub interval_ms: u64,

    /// Maximum jobs in flight per queue.
    #[serde(default = "default_max_per_queue")]
    pub max_per_queue: usize,

    /// Only claim jobs at or above this priority.
    #[serde(default)]
    pub min_priority: Option<i32>,

    /// Capacity of the worker event channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval(),
            max_per_queue: default_max_per_queue(),
            min_priority: None,
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_interval() -> u64 {
    3000
}

fn default_max_per_queue() -> usize {
    1
}

fn default_event_capacity() -> usize {
    1024
}

impl WorkerConfig {
    /// Get poll interval as Duration.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    fn validate(&self) -> JobResult<()> {
        if self.interval_ms == 0 {
            return Err(JobError::Configuration(
                "worker.interval_ms must be greater than 0".into(),
            ));
        }
        if self.max_per_queue == 0 {
            return Err(JobError::Configuration(
                "worker.max_per_queue must be at least 1".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(JobError::Configuration(
                "worker.event_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
