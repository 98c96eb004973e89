//! Stage configuration: one worker pool plus logging defaults.

use std::env;

use serde::{Deserialize, Serialize};

use super::pool::WorkerPoolConfig;
use crate::core::ConfigError;

/// Environment variable overriding the worker count.
pub const ENV_WORKER_COUNT: &str = "STAGE_WORKER_COUNT";
/// Environment variable overriding the worker thread name prefix.
pub const ENV_THREAD_NAME: &str = "STAGE_THREAD_NAME";
/// Environment variable overriding the worker stack size in bytes.
pub const ENV_THREAD_STACK_SIZE: &str = "STAGE_THREAD_STACK_SIZE";
/// Environment variable holding the default log filter directive.
pub const ENV_LOG: &str = "STAGE_LOG";

/// Root configuration for a [`Stage`](crate::core::Stage).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Background worker pool settings.
    pub worker_pool: WorkerPoolConfig,
    /// Default `tracing` filter directive, e.g. `"stage_loader=debug"`.
    pub log_filter: Option<String>,
}

impl StageConfig {
    /// Validate nested configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.worker_pool
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("worker_pool: {e}")))
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON and
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let cfg: Self =
            serde_json::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from the process environment.
    ///
    /// A `.env` file in the working directory is loaded first if present.
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when a numeric variable is not a number.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let mut cfg = Self::default();

        if let Some(count) = parse_env_usize(ENV_WORKER_COUNT)? {
            cfg.worker_pool.worker_count = count;
        }
        if let Ok(name) = env::var(ENV_THREAD_NAME) {
            cfg.worker_pool.thread_name = name;
        }
        if let Some(size) = parse_env_usize(ENV_THREAD_STACK_SIZE)? {
            cfg.worker_pool.thread_stack_size = Some(size);
        }
        if let Ok(filter) = env::var(ENV_LOG) {
            cfg.log_filter = Some(filter);
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

fn parse_env_usize(key: &str) -> Result<Option<usize>, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ConfigError::Parse(format!("{key}={raw}: {e}"))),
        Err(_) => Ok(None),
    }
}
