//! # offload
//!
//! In-process async background task execution for Rust services: a bounded
//! worker pool with reject-on-full backpressure, plus an instrumented
//! dispatcher that lets request handlers queue work ("send this email",
//! "issue this one-time code") without blocking on it.
//!
//! Two guarantees shape the whole crate:
//!
//! - **The pool never dies from a faulty task.** Every task runs inside a
//!   panic boundary; a trapped panic is logged and the worker keeps going.
//! - **Callers never block on a full queue.** Submission either succeeds
//!   immediately or fails immediately with [`SubmitError::QueueFull`].
//!
//! Dispatch is fire-and-forget: once a task is queued (or detached, when no
//! pool is configured), its outcome is visible only through `tracing` logs,
//! spans, and the optional [`MetricsSink`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use offload::{BackgroundService, BoxError, Dispatcher, WorkerPool};
//! use tokio_util::sync::CancellationToken;
//!
//! struct WelcomeEmail;
//!
//! #[async_trait]
//! impl BackgroundService for WelcomeEmail {
//!     type Input = String;
//!
//!     async fn execute(
//!         &self,
//!         _ctx: CancellationToken,
//!         locale: &str,
//!         address: String,
//!     ) -> Result<(), BoxError> {
//!         // render the template for `locale` and send it to `address`
//!         let _ = (locale, address);
//!         Ok(())
//!     }
//!
//!     fn name(&self) -> &str {
//!         "welcome-email"
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let pool = WorkerPool::new(CancellationToken::new(), 4, 64);
//!     let dispatcher = Dispatcher::new(Some(pool.clone()));
//!
//!     dispatcher
//!         .dispatch(Arc::new(WelcomeEmail), "en", "user@example.com".into())
//!         .expect("queue full or pool shut down");
//!
//!     // drain and shut down before the process exits
//!     pool.stop().await;
//! }
//! ```

pub mod dispatch;
pub mod global;
pub mod metrics;
pub mod pool;
pub mod service;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use dispatch::{
    Dispatcher, METRIC_TASK_DURATION, METRIC_TASK_ERROR, METRIC_TASK_PANIC, METRIC_TASK_SUCCESS,
};
pub use metrics::{MetricsSink, NoopMetrics};
pub use pool::{DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKER_COUNT, SubmitError, Task, WorkerPool};
pub use service::{BackgroundService, BoxError};
