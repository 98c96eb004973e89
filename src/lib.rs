//! # Stage Loader
//!
//! Asynchronous resource loading and task scheduling for a render stage.
//!
//! A render loop must never block on decoding an image or parsing a font.
//! This crate moves that work onto a small pool of background threads and
//! hands the results back to the render thread, where they are applied
//! during a per-frame drain.
//!
//! ## Components
//!
//! - **[`WorkerPool`](core::WorkerPool)**: fixed-size OS thread pool
//!   (`min(cores, 4)` threads) running zero-argument work items; survives
//!   panicking items.
//! - **[`TaskHandle`](core::TaskHandle)**: cloneable cooperative
//!   cancellation token, checked before the background step and before the
//!   completion callback.
//! - **[`TaskQueue`](core::TaskQueue)**: owning-thread queue. `queue` defers
//!   a callback; `run_async` computes on the pool and applies the result on
//!   the owning thread inside `process_tasks`.
//! - **[`Resource`](core::Resource)**: `Init → Loading → Ready | Error`
//!   state machine with re-entrancy-safe listeners.
//! - **[`ResourceStore`](core::ResourceStore)**: keyed registry with
//!   attach/detach lifecycle bound to an owning context.
//! - **[`Stage`](core::Stage)**: bundles one pool and one queue.
//!
//! ## Example
//!
//! ```rust
//! use stage_loader::config::{StageConfig, WorkerPoolConfig};
//! use stage_loader::core::{Resource, Stage};
//! use std::time::Duration;
//!
//! let stage = Stage::new(StageConfig {
//!     worker_pool: WorkerPoolConfig::new().with_worker_count(2),
//!     log_filter: None,
//! })
//! .unwrap();
//!
//! let image = Resource::new("logo.png", |id: &str| Ok(format!("pixels of {id}")));
//! image.add_listener(|res| println!("{} is now {}", res.id(), res.state()));
//! image.load(stage.queue());
//!
//! // The render loop drains completions once per frame.
//! while image.is_loading() {
//!     stage.tick();
//!     std::thread::sleep(Duration::from_millis(1));
//! }
//! assert!(image.is_ready());
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Worker pool, task queue, cancellation, and resource lifecycle.
pub mod core;
/// Configuration models for worker pools and stages.
pub mod config;
/// Runtime adapters for async loaders.
pub mod runtime;
/// Shared utilities.
pub mod util;
