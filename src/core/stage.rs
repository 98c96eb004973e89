//! The owning execution context: one worker pool plus one task queue.

use std::fmt;
use std::hash::Hash;
use std::rc::Rc;
use std::sync::Arc;

use tracing::info;

use crate::config::StageConfig;
use crate::core::{AppResult, PoolStats, ResourceStore, StoreEntry, TaskQueue, WorkerPool};
use crate::util::init_tracing_with;

/// Pairs a [`WorkerPool`] with the [`TaskQueue`] its results drain into.
///
/// Create one per render thread and call [`Stage::tick`] once per frame.
/// Dropping the stage shuts both down; callbacks still queued are dropped.
pub struct Stage {
    config: StageConfig,
    pool: Arc<WorkerPool>,
    queue: Rc<TaskQueue>,
}

impl Stage {
    /// Spawn the worker pool described by `config` and bind a fresh queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or workers cannot be
    /// spawned.
    pub fn new(config: StageConfig) -> AppResult<Self> {
        config.validate()?;
        let pool = Arc::new(WorkerPool::new(config.worker_pool.clone())?);
        let queue = Rc::new(TaskQueue::with_pool(Arc::clone(&pool)));
        info!(worker_count = pool.worker_count(), "stage started");
        Ok(Self {
            config,
            pool,
            queue,
        })
    }

    /// Build a stage from `STAGE_*` environment variables and install the
    /// configured log filter.
    ///
    /// # Errors
    ///
    /// See [`StageConfig::from_env`] and [`Stage::new`].
    pub fn from_env() -> AppResult<Self> {
        let config = StageConfig::from_env()?;
        init_tracing_with(config.log_filter.as_deref().unwrap_or("info"));
        Self::new(config)
    }

    /// Configuration the stage was built from.
    #[must_use]
    pub const fn config(&self) -> &StageConfig {
        &self.config
    }

    /// The shared worker pool.
    #[must_use]
    pub const fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// The owning-thread task queue.
    #[must_use]
    pub const fn queue(&self) -> &Rc<TaskQueue> {
        &self.queue
    }

    /// Create a detached store whose entries load through this stage.
    #[must_use]
    pub fn store<K, V>(&self) -> ResourceStore<K, V>
    where
        K: Eq + Hash + Clone + fmt::Debug,
        V: StoreEntry<K, Context = TaskQueue>,
    {
        ResourceStore::new(Rc::clone(&self.queue))
    }

    /// Apply every completion that is ready. Returns the callbacks run.
    pub fn tick(&self) -> usize {
        self.queue.process_tasks()
    }

    /// Whether the stage still accepts work.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.queue.is_open() && self.pool.is_running()
    }

    /// Worker pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Close the queue, then stop and join the workers. Idempotent.
    pub fn shutdown(&self) {
        if !self.queue.is_open() && !self.pool.is_running() {
            return;
        }
        self.queue.shutdown_now();
        self.pool.shutdown_now();
        info!("stage shut down");
    }
}

impl Drop for Stage {
    fn drop(&mut self) {
        self.shutdown();
    }
}
