//! Configuration models for worker pools and stages.

pub mod pool;
pub mod stage;

pub use pool::{default_worker_count, WorkerPoolConfig, MAX_WORKER_COUNT};
pub use stage::StageConfig;
