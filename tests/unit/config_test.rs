//! Tests for configuration parsing, validation, and environment overrides

use parking_lot::{const_mutex, Mutex};
use stage_loader::config::{default_worker_count, StageConfig, WorkerPoolConfig, MAX_WORKER_COUNT};
use stage_loader::core::{ConfigError, Stage};
use std::env;

const STAGE_VARS: [&str; 4] = [
    "STAGE_WORKER_COUNT",
    "STAGE_THREAD_NAME",
    "STAGE_THREAD_STACK_SIZE",
    "STAGE_LOG",
];

/// Process environment is global; tests that touch it run one at a time.
static ENV_LOCK: Mutex<()> = const_mutex(());

/// Runs `f` with exactly `vars` set among the `STAGE_*` variables.
fn with_stage_env<R>(vars: &[(&str, &str)], f: impl FnOnce() -> R) -> R {
    let _guard = ENV_LOCK.lock();
    for key in STAGE_VARS {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }
    let result = f();
    for key in STAGE_VARS {
        env::remove_var(key);
    }
    result
}

#[test]
fn test_default_worker_count_is_bounded() {
    let count = default_worker_count();
    assert!((1..=MAX_WORKER_COUNT).contains(&count));
    assert_eq!(WorkerPoolConfig::default().worker_count, count);
}

#[test]
fn test_default_stage_config_is_valid() {
    let cfg = StageConfig::default();
    assert!(cfg.validate().is_ok());
    assert!(cfg.log_filter.is_none());
    assert_eq!(cfg.worker_pool.thread_name, "stage-worker");
}

#[test]
fn test_from_json_full() {
    let cfg = StageConfig::from_json_str(
        r#"{
            "worker_pool": { "worker_count": 2, "thread_name": "decode", "thread_stack_size": 1048576 },
            "log_filter": "stage_loader=debug"
        }"#,
    )
    .unwrap();
    assert_eq!(cfg.worker_pool.worker_count, 2);
    assert_eq!(cfg.worker_pool.thread_name, "decode");
    assert_eq!(cfg.worker_pool.thread_stack_size, Some(1_048_576));
    assert_eq!(cfg.log_filter.as_deref(), Some("stage_loader=debug"));
}

#[test]
fn test_from_json_partial_keeps_defaults() {
    let cfg = StageConfig::from_json_str(r#"{ "worker_pool": { "worker_count": 1 } }"#).unwrap();
    assert_eq!(cfg.worker_pool.worker_count, 1);
    assert_eq!(cfg.worker_pool.thread_name, "stage-worker");
    assert!(cfg.worker_pool.thread_stack_size.is_none());
}

#[test]
fn test_from_json_malformed() {
    let err = StageConfig::from_json_str("{ worker_pool: ").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn test_from_json_out_of_range() {
    let err = StageConfig::from_json_str(r#"{ "worker_pool": { "worker_count": 16 } }"#).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
    assert!(err.to_string().contains("worker_pool"));
}

#[test]
fn test_zero_stack_size_rejected() {
    let cfg = WorkerPoolConfig::new().with_thread_stack_size(0);
    assert!(cfg.validate().is_err());
}

#[test]
fn test_from_env_without_overrides_uses_defaults() {
    let cfg = with_stage_env(&[], StageConfig::from_env).unwrap();
    assert_eq!(cfg, StageConfig::default());
}

#[test]
fn test_from_env_applies_overrides() {
    let cfg = with_stage_env(
        &[
            ("STAGE_WORKER_COUNT", " 2 "),
            ("STAGE_THREAD_NAME", "asset-decoder"),
            ("STAGE_THREAD_STACK_SIZE", "2097152"),
            ("STAGE_LOG", "stage_loader=trace"),
        ],
        StageConfig::from_env,
    )
    .unwrap();
    assert_eq!(cfg.worker_pool.worker_count, 2);
    assert_eq!(cfg.worker_pool.thread_name, "asset-decoder");
    assert_eq!(cfg.worker_pool.thread_stack_size, Some(2_097_152));
    assert_eq!(cfg.log_filter.as_deref(), Some("stage_loader=trace"));
}

#[test]
fn test_from_env_non_numeric_count() {
    let err = with_stage_env(&[("STAGE_WORKER_COUNT", "many")], StageConfig::from_env).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
    assert!(err.to_string().contains("STAGE_WORKER_COUNT=many"));
}

#[test]
fn test_from_env_non_numeric_stack_size() {
    let err = with_stage_env(&[("STAGE_THREAD_STACK_SIZE", "1MB")], StageConfig::from_env).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn test_from_env_out_of_range_count() {
    let err = with_stage_env(&[("STAGE_WORKER_COUNT", "64")], StageConfig::from_env).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn test_stage_from_env_builds_configured_pool() {
    let stage = with_stage_env(
        &[("STAGE_WORKER_COUNT", "1"), ("STAGE_LOG", "warn")],
        Stage::from_env,
    )
    .unwrap();
    assert_eq!(stage.pool().worker_count(), 1);
    assert_eq!(stage.config().log_filter.as_deref(), Some("warn"));
    stage.shutdown();
}

#[test]
fn test_stage_from_env_rejects_bad_count() {
    let result = with_stage_env(&[("STAGE_WORKER_COUNT", "0")], Stage::from_env);
    let err = result.err().expect("zero workers must be rejected");
    assert!(matches!(err.downcast_ref::<ConfigError>(), Some(ConfigError::Invalid(_))));
}
