//! Worker pool, owning-thread task queue, and resource lifecycle.

pub mod error;
pub mod resource;
pub mod resource_store;
pub mod spawn;
pub mod stage;
pub mod task_handle;
pub mod task_queue;
pub mod worker_pool;

pub use error::{AppResult, ConfigError, PoolError, StoreError, TaskError, TaskQueueError};
pub use resource::{ListenerId, Loader, Resource, ResourceState};
pub use resource_store::{ResourceStore, StoreEntry};
pub use spawn::Spawn;
pub use stage::Stage;
pub use task_handle::TaskHandle;
pub use task_queue::{RemoteQueue, TaskQueue};
pub use worker_pool::{PoolStats, WorkItem, WorkerPool};
