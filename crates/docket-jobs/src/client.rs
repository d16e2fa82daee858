//! Client facade binding queues and workers to one store.

use crate::config::JobsConfig;
use crate::error::JobResult;
use crate::queue::{Queue, DEFAULT_QUEUE};
use crate::store::{JobStore, MemoryStore, RedisStore};
use crate::worker::WorkerBuilder;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Entry point for producers and workers sharing a store.
#[derive(Clone)]
pub struct Docket {
    store: Arc<dyn JobStore>,
    config: JobsConfig,
}

impl fmt::Debug for Docket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Docket").field("config", &self.config).finish()
    }
}

impl Docket {
    /// Wraps an existing store with default configuration.
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self::with_config(store, JobsConfig::default())
    }

    /// Wraps an existing store.
    pub fn with_config(store: Arc<dyn JobStore>, config: JobsConfig) -> Self {
        Self { store, config }
    }

    /// In-process store, for tests and single-process deployments.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Validates `config` and connects to Redis.
    pub async fn connect(config: &JobsConfig) -> JobResult<Self> {
        config.validate()?;
        let store = RedisStore::connect(&config.redis).await?;
        info!(key_prefix = %config.redis.key_prefix, "Job store connected");
        Ok(Self::with_config(Arc::new(store), config.clone()))
    }

    /// Backing store.
    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Queue bound to `name`.
    pub fn queue(&self, name: impl Into<String>) -> Queue {
        Queue::new(self.store.clone(), name)
    }

    /// Queue named `default`.
    pub fn default_queue(&self) -> Queue {
        self.queue(DEFAULT_QUEUE)
    }

    /// Worker builder named `name`, pre-loaded with the given queues and the
    /// configured worker settings.
    pub fn worker<S: Into<String>>(
        &self,
        name: impl Into<String>,
        queue_names: impl IntoIterator<Item = S>,
    ) -> WorkerBuilder {
        let queues = queue_names.into_iter().map(|name| self.queue(name));
        WorkerBuilder::from_config(&self.config.worker)
            .name(name)
            .queues(queues)
    }
}
