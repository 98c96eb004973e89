//! Tests for task handles obtained from a queue

use stage_loader::core::{TaskHandle, TaskQueue};

#[test]
fn test_default_handle_is_inert() {
    let handle = TaskHandle::default();
    assert!(handle.is_none());
    handle.cancel();
    assert!(!handle.was_cancelled());
    assert!(!handle.is_finished());
}

#[test]
fn test_clones_share_cancellation() {
    let queue = TaskQueue::new();
    let handle = queue.queue(|| {}).unwrap();
    let clone = handle.clone();

    clone.cancel();
    assert!(handle.was_cancelled());
    assert!(handle.is_finished());
    assert_eq!(queue.process_tasks(), 0);
}

#[test]
fn test_handle_finishes_after_callback() {
    let queue = TaskQueue::new();
    let handle = queue.queue(|| {}).unwrap();
    assert!(!handle.is_finished());

    queue.process_tasks();
    assert!(handle.is_finished());
    assert!(!handle.was_cancelled());
}

#[test]
fn test_cancel_from_another_thread() {
    let queue = TaskQueue::new();
    let handle = queue.queue(|| panic!("cancelled callback must not run")).unwrap();
    let remote = handle.clone();

    std::thread::spawn(move || remote.cancel()).join().unwrap();
    assert_eq!(queue.process_tasks(), 0);
}
