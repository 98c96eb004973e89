//! Error types for the worker pool, task queue, and resource store.

use thiserror::Error;

/// Errors produced by [`WorkerPool`](crate::core::WorkerPool).
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool has been shut down and no longer accepts work.
    #[error("pool has been shut down")]
    PoolShutdown,
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Errors surfaced synchronously when scheduling work on a [`TaskQueue`](crate::core::TaskQueue).
#[derive(Debug, Error)]
pub enum TaskQueueError {
    /// `run_async` was called before `init` bound a worker pool.
    #[error("task queue has no worker pool bound")]
    NotInitialized,
    /// The queue has been shut down.
    #[error("task queue has been shut down")]
    ShutDown,
    /// The bound worker pool rejected the work item.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Failure carried from background work to the owning thread.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The `execute` closure returned an error.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
    /// The `execute` closure panicked.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// The work was dropped before it could finish, e.g. by a pool or
    /// runtime shutting down.
    #[error("task abandoned before completion")]
    Abandoned,
    /// The work could not be scheduled at all.
    #[error("task could not be submitted: {0}")]
    Submit(#[from] TaskQueueError),
}

/// Errors produced by [`ResourceStore`](crate::core::ResourceStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// A resource with the same key is already registered.
    #[error("duplicate resource key: {0}")]
    DuplicateKey(String),
    /// A factory built an entry whose own key differs from the requested one.
    #[error("entry key {actual} does not match requested key {expected}")]
    KeyMismatch {
        /// Key the entry was requested under.
        expected: String,
        /// Key the entry reports for itself.
        actual: String,
    },
    /// `attach` was called on an attached store.
    #[error("store is already attached")]
    AlreadyAttached,
    /// `detach` was called on a detached store.
    #[error("store is not attached")]
    NotAttached,
}

/// Errors produced while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The input could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),
    /// A value failed validation.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
