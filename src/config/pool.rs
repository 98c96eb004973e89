//! Worker pool configuration.

use serde::{Deserialize, Serialize};

/// Upper bound on background worker threads per pool.
pub const MAX_WORKER_COUNT: usize = 4;

/// Default thread name prefix for pool workers.
pub const DEFAULT_THREAD_NAME: &str = "stage-worker";

/// Worker pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Number of dedicated worker threads.
    pub worker_count: usize,
    /// Thread name prefix; workers are named `{thread_name}-{index}`.
    pub thread_name: String,
    /// Optional stack size in bytes. `None` keeps the platform default.
    pub thread_stack_size: Option<usize>,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            thread_stack_size: None,
        }
    }
}

/// `min(hardware concurrency, MAX_WORKER_COUNT)`, never less than one.
#[must_use]
pub fn default_worker_count() -> usize {
    num_cpus::get().clamp(1, MAX_WORKER_COUNT)
}

impl WorkerPoolConfig {
    /// Create a configuration sized for the current machine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of worker threads.
    #[must_use]
    pub const fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }

    /// Set the worker thread stack size in bytes.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, stack_size: usize) -> Self {
        self.thread_stack_size = Some(stack_size);
        self
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.worker_count > MAX_WORKER_COUNT {
            return Err(format!(
                "worker_count must not exceed {MAX_WORKER_COUNT} (got {})",
                self.worker_count
            ));
        }
        if self.thread_name.trim().is_empty() {
            return Err("thread_name must not be empty".into());
        }
        if self.thread_stack_size == Some(0) {
            return Err("thread_stack_size must be greater than 0".into());
        }
        Ok(())
    }
}
