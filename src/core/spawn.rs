//! Abstraction over async runtimes used by [`TaskQueue::spawn_future`](crate::core::TaskQueue::spawn_future).

use std::future::Future;

/// Abstraction for spawning a future on a runtime.
pub trait Spawn {
    /// Spawn a detached future. Its output is reported through the task queue.
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static;
}
