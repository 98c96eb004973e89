//! Owning-thread task queue bridging background work to foreground callbacks.
//!
//! A [`TaskQueue`] belongs to one thread (the render thread of a stage). Work
//! handed to [`TaskQueue::run_async`] runs on the bound [`WorkerPool`]; its
//! completion callback is kept in a table on the owning thread and is only
//! invoked from [`TaskQueue::process_tasks`]. Worker threads never touch the
//! callback; they push a boxed outcome into a shared inbox and the owning
//! thread pairs it back up during the drain. Callbacks may therefore capture
//! `Rc`/`RefCell` state, and the queue itself is neither `Send` nor `Sync`.
//!
//! ```rust
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use stage_loader::core::TaskQueue;
//!
//! let queue = TaskQueue::new();
//! let hits = Rc::new(Cell::new(0));
//! let counter = Rc::clone(&hits);
//! queue.queue(move || counter.set(counter.get() + 1)).unwrap();
//! assert_eq!(hits.get(), 0);
//! queue.process_tasks();
//! assert_eq!(hits.get(), 1);
//! ```

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::core::{PoolError, Spawn, TaskError, TaskHandle, TaskQueueError, WorkerPool};
use crate::util::panic_message;

type TaskId = u64;

/// Type-erased `Result<T, TaskError>` travelling from a worker to the owner.
type Outcome = Box<dyn Any + Send>;

enum Entry {
    /// A `queue()` callback is ready to run.
    Ready(TaskId),
    /// Background work finished; the outcome awaits its callback.
    Completed { id: TaskId, outcome: Outcome },
    /// Background work observed cancellation; drop its callback.
    Discarded(TaskId),
    /// A callback queued from another thread through [`RemoteQueue`].
    Remote {
        handle: TaskHandle,
        callback: Box<dyn FnOnce() + Send>,
    },
}

/// Shared between the owning thread, workers, and remote producers.
struct Inbox {
    entries: Mutex<VecDeque<Entry>>,
    open: AtomicBool,
}

impl Inbox {
    fn push(&self, entry: Entry) -> bool {
        if !self.open.load(Ordering::Acquire) {
            return false;
        }
        self.entries.lock().push_back(entry);
        true
    }

    /// Second cancellation checkpoint: a cancelled task drops its result here.
    fn deliver<T: Send + 'static>(&self, id: TaskId, handle: &TaskHandle, result: Result<T, TaskError>) {
        if handle.was_cancelled() {
            trace!(task_id = id, "result discarded after cancellation");
            self.push(Entry::Discarded(id));
        } else {
            self.push(Entry::Completed {
                id,
                outcome: Box::new(result),
            });
        }
    }

    fn take_all(&self) -> VecDeque<Entry> {
        std::mem::take(&mut *self.entries.lock())
    }
}

enum Callback {
    Local(Box<dyn FnOnce()>),
    Async(Box<dyn FnOnce(Outcome)>),
}

struct PendingCallback {
    handle: TaskHandle,
    callback: Callback,
}

/// Queue of deferred callbacks drained by its owning thread.
pub struct TaskQueue {
    inbox: Arc<Inbox>,
    pending: RefCell<HashMap<TaskId, PendingCallback>>,
    pool: RefCell<Option<Arc<WorkerPool>>>,
    next_id: Cell<TaskId>,
    draining: Cell<bool>,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    /// Create an open queue with no worker pool bound.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inbox: Arc::new(Inbox {
                entries: Mutex::new(VecDeque::new()),
                open: AtomicBool::new(true),
            }),
            pending: RefCell::new(HashMap::new()),
            pool: RefCell::new(None),
            next_id: Cell::new(1),
            draining: Cell::new(false),
        }
    }

    /// Create a queue already bound to `pool`.
    #[must_use]
    pub fn with_pool(pool: Arc<WorkerPool>) -> Self {
        let queue = Self::new();
        queue.init(pool);
        queue
    }

    /// Bind the worker pool used by [`run_async`](Self::run_async).
    pub fn init(&self, pool: Arc<WorkerPool>) {
        debug!(worker_count = pool.worker_count(), "TaskQueue bound to worker pool");
        *self.pool.borrow_mut() = Some(pool);
    }

    /// Whether a worker pool is bound.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.pool.borrow().is_some()
    }

    /// Whether the queue still accepts work.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inbox.open.load(Ordering::Acquire)
    }

    /// Number of callbacks registered but not yet run, skipped, or dropped.
    #[must_use]
    pub fn pending_callbacks(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Whether anything is still waiting for a future `process_tasks` call.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending_callbacks() > 0 || !self.inbox.entries.lock().is_empty()
    }

    /// A `Send` handle for queueing callbacks onto this queue from other threads.
    #[must_use]
    pub fn remote(&self) -> RemoteQueue {
        RemoteQueue {
            inbox: Arc::clone(&self.inbox),
        }
    }

    /// Queue `callback` to run during a later [`process_tasks`](Self::process_tasks).
    ///
    /// # Errors
    ///
    /// Returns `TaskQueueError::ShutDown` after [`shutdown_now`](Self::shutdown_now).
    pub fn queue<F>(&self, callback: F) -> Result<TaskHandle, TaskQueueError>
    where
        F: FnOnce() + 'static,
    {
        self.ensure_open()?;
        let handle = TaskHandle::new();
        let id = self.register(handle.clone(), Callback::Local(Box::new(callback)));
        self.inbox.push(Entry::Ready(id));
        Ok(handle)
    }

    /// Run `execute` on the worker pool, then `callback` on the owning thread.
    ///
    /// `execute` is skipped if the handle is cancelled before a worker picks
    /// it up; its result is dropped if the handle is cancelled before the
    /// drain reaches it. An `Err` or panic from `execute` reaches `callback`
    /// as a [`TaskError`]. If the pool drops the work without running it
    /// (shutdown), `callback` receives `TaskError::Abandoned`.
    ///
    /// # Errors
    ///
    /// Returns `TaskQueueError::NotInitialized` if no pool is bound,
    /// `TaskQueueError::ShutDown` after shutdown, and `TaskQueueError::Pool`
    /// if the pool rejects the work. `callback` is dropped uncalled in all
    /// three cases.
    pub fn run_async<T, E, C>(&self, execute: E, callback: C) -> Result<TaskHandle, TaskQueueError>
    where
        T: Send + 'static,
        E: FnOnce() -> anyhow::Result<T> + Send + 'static,
        C: FnOnce(Result<T, TaskError>) + 'static,
    {
        self.ensure_open()?;
        let pool = self
            .pool
            .borrow()
            .clone()
            .ok_or(TaskQueueError::NotInitialized)?;

        if !pool.is_running() {
            return Err(PoolError::PoolShutdown.into());
        }

        let (id, handle) = self.register_async(callback);
        let guard = self.completion_guard::<T>(id, &handle);

        let submitted = pool.submit(move || {
            if guard.handle.was_cancelled() {
                trace!(task_id = guard.id, "task cancelled before execution");
                guard.discard();
                return;
            }
            let result = match catch_unwind(AssertUnwindSafe(execute)) {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(TaskError::Failed(e)),
                Err(payload) => Err(TaskError::Panicked(panic_message(payload.as_ref()))),
            };
            guard.complete(result);
        });

        if let Err(e) = submitted {
            // The rejected closure already reported `Abandoned`; with the
            // callback gone the next drain drops that entry.
            let dropped = self.pending.borrow_mut().remove(&id);
            drop(dropped);
            return Err(e.into());
        }
        Ok(handle)
    }

    /// Run `future` on `spawner`, then `callback` on the owning thread.
    ///
    /// Same checkpoints as [`run_async`](Self::run_async). If the future is
    /// dropped before finishing (runtime shutdown, panic), `callback`
    /// receives `TaskError::Abandoned`.
    ///
    /// # Errors
    ///
    /// Returns `TaskQueueError::ShutDown` after shutdown.
    pub fn spawn_future<S, Fut, T, C>(
        &self,
        spawner: &S,
        future: Fut,
        callback: C,
    ) -> Result<TaskHandle, TaskQueueError>
    where
        S: Spawn,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
        C: FnOnce(Result<T, TaskError>) + 'static,
    {
        self.ensure_open()?;
        let (id, handle) = self.register_async(callback);
        let guard = self.completion_guard::<T>(id, &handle);

        spawner.spawn(async move {
            if guard.handle.was_cancelled() {
                guard.discard();
                return;
            }
            let result = future.await.map_err(TaskError::Failed);
            guard.complete(result);
        });
        Ok(handle)
    }

    /// Drain everything queued so far, in FIFO order.
    ///
    /// Cancelled entries are skipped. A panicking callback is logged and the
    /// drain continues. Work queued by the callbacks themselves waits for the
    /// next call. If a callback shuts the queue down, the rest of the batch
    /// is dropped unrun. Returns the number of callbacks invoked.
    pub fn process_tasks(&self) -> usize {
        if self.draining.replace(true) {
            warn!("process_tasks called re-entrantly from a callback; ignoring");
            return 0;
        }

        let mut entries = self.inbox.take_all().into_iter();
        let mut invoked = 0;

        while self.is_open() {
            let Some(entry) = entries.next() else {
                break;
            };
            let ran = match entry {
                Entry::Ready(id) => self
                    .take_pending(id)
                    .is_some_and(|pending| invoke_pending(id, pending, None)),
                Entry::Completed { id, outcome } => self
                    .take_pending(id)
                    .is_some_and(|pending| invoke_pending(id, pending, Some(outcome))),
                Entry::Discarded(id) => {
                    let dropped = self.take_pending(id);
                    drop(dropped);
                    false
                }
                Entry::Remote { handle, callback } => invoke_callback(0, &handle, callback),
            };
            if ran {
                invoked += 1;
            }
        }

        let dropped = entries.len();
        if dropped > 0 {
            debug!(dropped, "TaskQueue shut down mid-drain; dropping remaining entries");
        }
        drop(entries);

        self.draining.set(false);
        invoked
    }

    /// Unbind the pool and drop every queued callback without running it.
    ///
    /// Background work already submitted still runs, but its results are
    /// discarded. Later `queue`/`run_async` calls fail with `ShutDown`.
    pub fn shutdown_now(&self) {
        if !self.inbox.open.swap(false, Ordering::AcqRel) {
            return;
        }
        let pool = self.pool.borrow_mut().take();
        let queued = self.inbox.take_all();
        let pending = std::mem::take(&mut *self.pending.borrow_mut());
        debug!(
            queued = queued.len(),
            pending = pending.len(),
            "TaskQueue shut down; dropping queued callbacks"
        );
        drop(pending);
        drop(queued);
        drop(pool);
    }

    fn ensure_open(&self) -> Result<(), TaskQueueError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(TaskQueueError::ShutDown)
        }
    }

    fn register(&self, handle: TaskHandle, callback: Callback) -> TaskId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.pending
            .borrow_mut()
            .insert(id, PendingCallback { handle, callback });
        id
    }

    fn register_async<T, C>(&self, callback: C) -> (TaskId, TaskHandle)
    where
        T: Send + 'static,
        C: FnOnce(Result<T, TaskError>) + 'static,
    {
        let handle = TaskHandle::new();
        let typed = move |outcome: Outcome| match outcome.downcast::<Result<T, TaskError>>() {
            Ok(result) => callback(*result),
            Err(_) => error!("task outcome has an unexpected type; callback skipped"),
        };
        let id = self.register(handle.clone(), Callback::Async(Box::new(typed)));
        (id, handle)
    }

    fn completion_guard<T: Send + 'static>(&self, id: TaskId, handle: &TaskHandle) -> CompletionGuard<T> {
        CompletionGuard {
            inbox: Arc::clone(&self.inbox),
            id,
            handle: handle.clone(),
            done: false,
            _result: PhantomData,
        }
    }

    fn take_pending(&self, id: TaskId) -> Option<PendingCallback> {
        self.pending.borrow_mut().remove(&id)
    }
}

fn invoke_pending(id: TaskId, pending: PendingCallback, outcome: Option<Outcome>) -> bool {
    let PendingCallback { handle, callback } = pending;
    let call: Box<dyn FnOnce()> = match (callback, outcome) {
        (Callback::Local(cb), None) => cb,
        (Callback::Async(cb), Some(outcome)) => Box::new(move || cb(outcome)),
        _ => {
            error!(task_id = id, "queue entry does not match its callback kind");
            return false;
        }
    };
    invoke_callback(id, &handle, call)
}

fn invoke_callback<F: FnOnce()>(id: TaskId, handle: &TaskHandle, callback: F) -> bool {
    if handle.was_cancelled() {
        trace!(task_id = id, "callback skipped after cancellation");
        return false;
    }
    handle.finish();
    if let Err(payload) = catch_unwind(AssertUnwindSafe(callback)) {
        error!(
            task_id = id,
            panic = %panic_message(payload.as_ref()),
            "task callback panicked"
        );
    }
    true
}

/// Reports a task's outcome exactly once, even if the work is dropped unrun.
struct CompletionGuard<T: Send + 'static> {
    inbox: Arc<Inbox>,
    id: TaskId,
    handle: TaskHandle,
    done: bool,
    _result: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> CompletionGuard<T> {
    fn complete(mut self, result: Result<T, TaskError>) {
        self.done = true;
        self.inbox.deliver(self.id, &self.handle, result);
    }

    fn discard(mut self) {
        self.done = true;
        self.inbox.push(Entry::Discarded(self.id));
    }
}

impl<T: Send + 'static> Drop for CompletionGuard<T> {
    fn drop(&mut self) {
        if !self.done {
            self.inbox.deliver::<T>(
                self.id,
                &self.handle,
                Err(TaskError::Abandoned),
            );
        }
    }
}

/// Thread-safe producer handle for a [`TaskQueue`].
///
/// Callbacks queued here run on the queue's owning thread during its next
/// drain, interleaved in FIFO order with local entries.
#[derive(Clone)]
pub struct RemoteQueue {
    inbox: Arc<Inbox>,
}

impl RemoteQueue {
    /// Queue a `Send` callback for the owning thread.
    ///
    /// # Errors
    ///
    /// Returns `TaskQueueError::ShutDown` once the owning queue shut down.
    pub fn queue<F>(&self, callback: F) -> Result<TaskHandle, TaskQueueError>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = TaskHandle::new();
        let entry = Entry::Remote {
            handle: handle.clone(),
            callback: Box::new(callback),
        };
        if self.inbox.push(entry) {
            Ok(handle)
        } else {
            Err(TaskQueueError::ShutDown)
        }
    }

    /// Whether the owning queue still accepts work.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inbox.open.load(Ordering::Acquire)
    }
}
