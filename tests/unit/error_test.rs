//! Tests for error types

use stage_loader::core::{PoolError, StoreError, TaskError, TaskQueueError};

#[test]
fn test_pool_shutdown_error() {
    assert_eq!(PoolError::PoolShutdown.to_string(), "pool has been shut down");
}

#[test]
fn test_queue_error_wraps_pool_error() {
    let err = TaskQueueError::from(PoolError::PoolShutdown);
    assert_eq!(err.to_string(), "pool has been shut down");
    assert_eq!(
        TaskQueueError::NotInitialized.to_string(),
        "task queue has no worker pool bound"
    );
}

#[test]
fn test_failed_task_keeps_message() {
    let err = TaskError::from(anyhow::anyhow!("decode failed"));
    assert_eq!(err.to_string(), "decode failed");
}

#[test]
fn test_panicked_task_error() {
    let err = TaskError::Panicked("index out of bounds".to_string());
    assert_eq!(err.to_string(), "task panicked: index out of bounds");
}

#[test]
fn test_submit_error() {
    let err = TaskError::from(TaskQueueError::ShutDown);
    assert_eq!(
        err.to_string(),
        "task could not be submitted: task queue has been shut down"
    );
}

#[test]
fn test_store_errors() {
    let err = StoreError::DuplicateKey("\"logo.png\"".to_string());
    assert_eq!(err.to_string(), "duplicate resource key: \"logo.png\"");
    assert_eq!(StoreError::AlreadyAttached.to_string(), "store is already attached");
    assert_eq!(StoreError::NotAttached.to_string(), "store is not attached");
}

#[test]
fn test_abandoned_task_error() {
    assert_eq!(TaskError::Abandoned.to_string(), "task abandoned before completion");
}

#[test]
fn test_key_mismatch_error() {
    let err = StoreError::KeyMismatch {
        expected: "\"a.png\"".to_string(),
        actual: "\"b.png\"".to_string(),
    };
    assert_eq!(
        err.to_string(),
        "entry key \"b.png\" does not match requested key \"a.png\""
    );
}
