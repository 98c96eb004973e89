//! Cooperative cancellation token shared between a submitter and its task.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

const PENDING: u8 = 0;
const CANCELLED: u8 = 1;
const FINISHED: u8 = 2;

/// A cloneable reference to one scheduled task.
///
/// All clones share one atomic flag, so cancelling through any clone cancels
/// the task for every holder. Cancellation is honored only at checkpoints
/// (before the background step and before the callback); work already
/// running is never interrupted.
///
/// A default handle refers to no task and never reports cancellation.
#[derive(Clone, Default)]
pub struct TaskHandle {
    state: Option<Arc<AtomicU8>>,
}

impl TaskHandle {
    pub(crate) fn new() -> Self {
        Self {
            state: Some(Arc::new(AtomicU8::new(PENDING))),
        }
    }

    /// Request cancellation. Safe from any thread, any number of times; has no
    /// effect once the task's callback has run or been skipped.
    pub fn cancel(&self) {
        if let Some(state) = &self.state {
            let _ = state.compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire);
        }
    }

    /// Whether the task was cancelled before it finished.
    #[must_use]
    pub fn was_cancelled(&self) -> bool {
        self.load() == Some(CANCELLED)
    }

    /// Whether the task reached a terminal state (callback run or skipped).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self.load(), Some(CANCELLED | FINISHED))
    }

    /// Whether this handle refers to no task.
    #[must_use]
    pub const fn is_none(&self) -> bool {
        self.state.is_none()
    }

    /// Mark the callback as run. Later `cancel` calls become no-ops.
    pub(crate) fn finish(&self) {
        if let Some(state) = &self.state {
            let _ = state.compare_exchange(PENDING, FINISHED, Ordering::AcqRel, Ordering::Acquire);
        }
    }

    fn load(&self) -> Option<u8> {
        self.state.as_ref().map(|s| s.load(Ordering::Acquire))
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.load() {
            None => "none",
            Some(PENDING) => "pending",
            Some(CANCELLED) => "cancelled",
            Some(_) => "finished",
        };
        f.debug_struct("TaskHandle").field("state", &state).finish()
    }
}
