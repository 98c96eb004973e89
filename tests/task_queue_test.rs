//! Integration tests for `TaskQueue`
//!
//! These tests validate:
//! - Callbacks only ever run on the draining thread
//! - Both cancellation checkpoints (before execute, before callback)
//! - Error and panic propagation from workers to callbacks
//! - Bulk completion with out-of-order worker finish times
//! - Work abandoned by a pool shutdown still settles its callback

use rand::Rng;
use stage_loader::config::WorkerPoolConfig;
use stage_loader::core::{TaskError, TaskQueue, TaskQueueError, WorkerPool};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn setup(workers: usize) -> (TaskQueue, Arc<WorkerPool>) {
    let pool = Arc::new(WorkerPool::new(WorkerPoolConfig::new().with_worker_count(workers)).unwrap());
    (TaskQueue::with_pool(Arc::clone(&pool)), pool)
}

/// Drains until nothing is pending or ten seconds pass.
fn drain_until_idle(queue: &TaskQueue) -> usize {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut invoked = 0;
    while queue.has_pending() {
        assert!(Instant::now() < deadline, "queue did not go idle");
        invoked += queue.process_tasks();
        thread::sleep(Duration::from_millis(1));
    }
    invoked
}

/// Keeps the only worker busy until the returned sender fires.
fn occupy_worker(queue: &TaskQueue) -> mpsc::Sender<()> {
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let (started_tx, started_rx) = mpsc::channel::<()>();
    queue
        .run_async(
            move || {
                started_tx.send(()).unwrap();
                release_rx.recv_timeout(Duration::from_secs(10)).ok();
                Ok(())
            },
            |_: Result<(), TaskError>| {},
        )
        .unwrap();
    started_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    release_tx
}

/// Keeps the only worker busy until `pool` stops running.
fn occupy_until_shutdown(queue: &TaskQueue, pool: &Arc<WorkerPool>) {
    let weak = Arc::downgrade(pool);
    let (started_tx, started_rx) = mpsc::channel::<()>();
    queue
        .run_async(
            move || {
                started_tx.send(()).unwrap();
                while weak.upgrade().is_some_and(|p| p.is_running()) {
                    thread::sleep(Duration::from_millis(1));
                }
                Ok(())
            },
            |_: Result<(), TaskError>| {},
        )
        .unwrap();
    started_rx.recv_timeout(Duration::from_secs(10)).unwrap();
}

// ============================================================================
// TESTS
// ============================================================================

#[test]
fn test_hundred_squares() {
    let (queue, pool) = setup(4);
    let results = Rc::new(RefCell::new(Vec::new()));

    for i in 0..100_u64 {
        let results = Rc::clone(&results);
        queue
            .run_async(
                move || {
                    let jitter = rand::rng().random_range(0..3);
                    thread::sleep(Duration::from_millis(jitter));
                    Ok(i * i)
                },
                move |result: Result<u64, TaskError>| {
                    let value = result.expect("no error expected");
                    results.borrow_mut().push((i, value));
                },
            )
            .unwrap();
    }

    assert_eq!(drain_until_idle(&queue), 100);

    let results = results.borrow();
    assert_eq!(results.len(), 100);
    for &(i, value) in results.iter() {
        assert_eq!(value, i * i);
    }
    pool.shutdown_now();
}

#[test]
fn test_execute_error_reaches_callback() {
    let (queue, pool) = setup(1);
    let message = Rc::new(RefCell::new(None));
    let out = Rc::clone(&message);

    queue
        .run_async(
            || -> anyhow::Result<Vec<u8>> { Err(anyhow::anyhow!("decode failed")) },
            move |result| {
                let err = result.unwrap_err();
                assert!(matches!(err, TaskError::Failed(_)));
                *out.borrow_mut() = Some(err.to_string());
            },
        )
        .unwrap();

    drain_until_idle(&queue);
    assert_eq!(message.borrow().as_deref(), Some("decode failed"));
    pool.shutdown_now();
}

#[test]
fn test_cancel_before_execute() {
    let (queue, pool) = setup(1);
    let release = occupy_worker(&queue);

    let executed = Arc::new(AtomicBool::new(false));
    let called = Rc::new(Cell::new(false));
    let (e, c) = (Arc::clone(&executed), Rc::clone(&called));

    let handle = queue
        .run_async(
            move || {
                e.store(true, Ordering::SeqCst);
                Ok(1)
            },
            move |_: Result<i32, TaskError>| c.set(true),
        )
        .unwrap();

    handle.cancel();
    release.send(()).unwrap();
    drain_until_idle(&queue);

    assert!(handle.was_cancelled());
    assert!(!executed.load(Ordering::SeqCst));
    assert!(!called.get());
    pool.shutdown_now();
}

#[test]
fn test_cancel_after_execute_before_drain() {
    let (queue, pool) = setup(1);
    let (done_tx, done_rx) = mpsc::channel();
    let called = Rc::new(Cell::new(false));
    let c = Rc::clone(&called);

    let handle = queue
        .run_async(
            move || {
                done_tx.send(()).unwrap();
                Ok("decoded")
            },
            move |_: Result<&'static str, TaskError>| c.set(true),
        )
        .unwrap();

    done_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    handle.cancel();
    drain_until_idle(&queue);

    assert!(!called.get());
    assert_eq!(queue.pending_callbacks(), 0);
    pool.shutdown_now();
}

#[test]
fn test_cancel_after_callback_is_noop() {
    let (queue, pool) = setup(1);
    let handle = queue.run_async(|| Ok(5), |_: Result<i32, TaskError>| {}).unwrap();
    drain_until_idle(&queue);

    handle.cancel();
    assert!(!handle.was_cancelled());
    assert!(handle.is_finished());
    pool.shutdown_now();
}

#[test]
fn test_callbacks_run_on_owner_thread() {
    let (queue, pool) = setup(4);
    let owner = thread::current().id();
    let worker_threads = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let mismatches = Rc::new(Cell::new(0));

    for _ in 0..20 {
        let workers = Arc::clone(&worker_threads);
        let mismatches = Rc::clone(&mismatches);
        queue
            .run_async(
                move || {
                    workers.lock().push(thread::current().id());
                    Ok(())
                },
                move |_: Result<(), TaskError>| {
                    if thread::current().id() != owner {
                        mismatches.set(mismatches.get() + 1);
                    }
                },
            )
            .unwrap();
    }

    drain_until_idle(&queue);
    assert_eq!(mismatches.get(), 0);
    assert!(worker_threads.lock().iter().all(|id| *id != owner));
    pool.shutdown_now();
}

#[test]
fn test_completion_order_follows_finish_order() {
    let (queue, pool) = setup(2);
    let order = Rc::new(RefCell::new(Vec::new()));

    let slow = Rc::clone(&order);
    queue
        .run_async(
            || {
                thread::sleep(Duration::from_millis(100));
                Ok("slow")
            },
            move |r: Result<&'static str, TaskError>| slow.borrow_mut().push(r.unwrap()),
        )
        .unwrap();

    let fast = Rc::clone(&order);
    queue
        .run_async(|| Ok("fast"), move |r: Result<&'static str, TaskError>| fast.borrow_mut().push(r.unwrap()))
        .unwrap();

    drain_until_idle(&queue);
    assert_eq!(*order.borrow(), vec!["fast", "slow"]);
    pool.shutdown_now();
}

#[test]
fn test_shutdown_drops_in_flight_results() {
    let (queue, pool) = setup(1);
    let release = occupy_worker(&queue);
    let called = Rc::new(Cell::new(false));
    let c = Rc::clone(&called);

    queue
        .run_async(|| Ok(1), move |_: Result<i32, TaskError>| c.set(true))
        .unwrap();

    queue.shutdown_now();
    release.send(()).unwrap();
    pool.shutdown_now();

    assert_eq!(queue.process_tasks(), 0);
    assert!(!called.get());
    assert!(matches!(
        queue.run_async(|| Ok(1), |_: Result<i32, TaskError>| {}),
        Err(TaskQueueError::ShutDown)
    ));
}

#[test]
fn test_submit_to_stopped_pool_fails_synchronously() {
    let (queue, pool) = setup(1);
    pool.shutdown_now();

    let result = queue.run_async(|| Ok(1), |_: Result<i32, TaskError>| {});
    assert!(matches!(result, Err(TaskQueueError::Pool(_))));
    assert_eq!(queue.pending_callbacks(), 0);
}

#[test]
fn test_pool_shutdown_abandons_queued_work() {
    let (queue, pool) = setup(1);
    occupy_until_shutdown(&queue, &pool);

    let outcome = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&outcome);
    queue
        .run_async(
            || Ok(7),
            move |result: Result<i32, TaskError>| *slot.borrow_mut() = Some(result),
        )
        .unwrap();

    pool.shutdown_now();
    assert_eq!(pool.stats().discarded_tasks, 1);

    queue.process_tasks();
    assert!(!queue.has_pending());
    assert_eq!(queue.pending_callbacks(), 0);
    assert!(matches!(*outcome.borrow(), Some(Err(TaskError::Abandoned))));
}
