//! Fixed-size pool of OS threads for blocking decode/parse work.
//!
//! Work items are zero-argument closures pushed onto an unbounded
//! multi-producer/multi-consumer channel. Each worker blocks on the channel,
//! runs one item at a time, and survives panics raised by the items it runs.
//!
//! # Example
//!
//! ```rust
//! use stage_loader::config::WorkerPoolConfig;
//! use stage_loader::core::WorkerPool;
//!
//! let pool = WorkerPool::new(WorkerPoolConfig::new().with_worker_count(2)).unwrap();
//! pool.submit(|| println!("decoded")).unwrap();
//! pool.shutdown_now();
//! assert!(!pool.is_running());
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::WorkerPoolConfig;
use crate::core::PoolError;
use crate::util::panic_message;

/// A unit of background work. No identity, fire-and-forget once enqueued.
pub type WorkItem = Box<dyn FnOnce() + Send + 'static>;

/// Messages consumed by worker threads.
enum Message {
    Run(WorkItem),
    Stop,
}

/// Statistics about pool utilization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of worker threads.
    pub worker_count: usize,
    /// Items accepted by `submit`.
    pub submitted_tasks: u64,
    /// Items that ran to completion.
    pub completed_tasks: u64,
    /// Items that panicked.
    pub panicked_tasks: u64,
    /// Items dropped without running because the pool shut down.
    pub discarded_tasks: u64,
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
struct PoolCounters {
    submitted_tasks: AtomicU64,
    completed_tasks: AtomicU64,
    panicked_tasks: AtomicU64,
    discarded_tasks: AtomicU64,
}

impl PoolCounters {
    fn snapshot(&self, worker_count: usize) -> PoolStats {
        PoolStats {
            worker_count,
            submitted_tasks: self.submitted_tasks.load(Ordering::Relaxed),
            completed_tasks: self.completed_tasks.load(Ordering::Relaxed),
            panicked_tasks: self.panicked_tasks.load(Ordering::Relaxed),
            discarded_tasks: self.discarded_tasks.load(Ordering::Relaxed),
        }
    }
}

/// Worker pool with dedicated OS threads.
///
/// `submit` may be called from any thread. `shutdown_now` is meant to be
/// called by the owning context once; repeated calls are no-ops.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    task_tx: Sender<Message>,
    /// Kept so `shutdown_now` can drain whatever the workers left behind.
    task_rx: Receiver<Message>,
    running: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<PoolCounters>,
}

impl WorkerPool {
    /// Create a pool and spawn `config.worker_count` threads.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` if the configuration is invalid and
    /// `PoolError::Spawn` if the OS refuses to create a thread. Threads that
    /// were already started are stopped before returning.
    pub fn new(config: WorkerPoolConfig) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;

        let (task_tx, task_rx) = unbounded::<Message>();
        let running = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(PoolCounters::default());

        let pool = Self {
            config,
            task_tx,
            task_rx,
            running,
            workers: Mutex::new(Vec::new()),
            counters,
        };

        for worker_id in 0..pool.config.worker_count {
            match pool.spawn_worker(worker_id) {
                Ok(handle) => pool.workers.lock().push(handle),
                Err(e) => {
                    error!(worker_id, error = %e, "failed to spawn worker thread");
                    pool.shutdown_now();
                    return Err(PoolError::Spawn(e));
                }
            }
        }

        info!(
            worker_count = pool.config.worker_count,
            thread_name = %pool.config.thread_name,
            "WorkerPool started"
        );

        Ok(pool)
    }

    /// Create a pool sized for the current machine.
    ///
    /// # Errors
    ///
    /// See [`WorkerPool::new`].
    pub fn with_defaults() -> Result<Self, PoolError> {
        Self::new(WorkerPoolConfig::default())
    }

    /// Enqueue `work` and wake one idle worker. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::PoolShutdown` after `shutdown_now`.
    pub fn submit<F>(&self, work: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.is_running() {
            return Err(PoolError::PoolShutdown);
        }
        self.task_tx
            .send(Message::Run(Box::new(work)))
            .map_err(|_| PoolError::PoolShutdown)?;
        self.counters.submitted_tasks.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Whether the pool still accepts work.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Number of worker threads this pool was started with.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.config.worker_count
    }

    /// Get current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot(self.config.worker_count)
    }

    /// Stop all workers, join them, and discard any items still queued.
    ///
    /// Items already executing run to completion before this returns; no
    /// queued item starts after the running flag is cleared.
    pub fn shutdown_now(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }

        info!("Shutting down worker pool");

        let mut workers = self.workers.lock();
        for _ in 0..workers.len() {
            // The receiver lives in `self`, so the channel cannot be disconnected here.
            let _ = self.task_tx.send(Message::Stop);
        }

        let worker_count = workers.len();
        for (idx, worker) in workers.drain(..).enumerate() {
            if worker.join().is_err() {
                warn!(worker_id = idx, "Worker thread panicked");
            } else {
                debug!(worker_id = idx, "Worker joined");
            }
        }

        let mut discarded = 0_u64;
        for message in self.task_rx.try_iter() {
            if matches!(message, Message::Run(_)) {
                discarded += 1;
            }
        }
        if discarded > 0 {
            self.counters
                .discarded_tasks
                .fetch_add(discarded, Ordering::Relaxed);
            debug!(discarded, "Dropped queued work items on shutdown");
        }

        info!(worker_count, "Worker pool shut down complete");
    }

    fn spawn_worker(&self, worker_id: usize) -> std::io::Result<JoinHandle<()>> {
        let task_rx = self.task_rx.clone();
        let running = Arc::clone(&self.running);
        let counters = Arc::clone(&self.counters);

        let mut builder =
            thread::Builder::new().name(format!("{}-{worker_id}", self.config.thread_name));
        if let Some(stack_size) = self.config.thread_stack_size {
            builder = builder.stack_size(stack_size);
        }

        builder.spawn(move || worker_loop(worker_id, &task_rx, &running, &counters))
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Signal shutdown but don't join: a worker stuck in a long decode
        // would otherwise hang the dropping thread.
        if self.running.swap(false, Ordering::AcqRel) {
            for _ in 0..self.workers.get_mut().len() {
                let _ = self.task_tx.send(Message::Stop);
            }
            debug!("WorkerPool dropped without explicit shutdown - workers will be detached");
        }
    }
}

fn worker_loop(
    worker_id: usize,
    task_rx: &Receiver<Message>,
    running: &AtomicBool,
    counters: &PoolCounters,
) {
    debug!(worker_id, "Worker thread started");

    loop {
        let work = match task_rx.recv() {
            Ok(Message::Run(work)) => work,
            Ok(Message::Stop) => break,
            Err(_) => {
                debug!(worker_id, "Worker channel closed, exiting");
                break;
            }
        };

        if !running.load(Ordering::Acquire) {
            counters.discarded_tasks.fetch_add(1, Ordering::Relaxed);
            break;
        }

        match catch_unwind(AssertUnwindSafe(work)) {
            Ok(()) => {
                counters.completed_tasks.fetch_add(1, Ordering::Relaxed);
            }
            Err(payload) => {
                counters.panicked_tasks.fetch_add(1, Ordering::Relaxed);
                error!(
                    worker_id,
                    panic = %panic_message(payload.as_ref()),
                    "Work item panicked; worker continues"
                );
            }
        }
    }

    debug!(worker_id, "Worker thread exiting");
}
