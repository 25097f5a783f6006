//! Execution orchestrator — instrumented, fire-and-forget dispatch.
//!
//! [`Dispatcher::dispatch`] is the one entry point business code should
//! use. It wraps a service invocation with a trace span, a latency metric,
//! and success/error counters, then hands the wrapped future either to a
//! [`WorkerPool`] or to a freshly spawned Tokio task when no pool is
//! configured.
//!
//! The contract is deliberately asymmetric: submission failure (queue full,
//! pool shut down) is synchronous and returned to the caller; execution
//! failure is asynchronous and observable only through logs and metrics.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info_span};

use crate::metrics::{MetricsSink, NoopMetrics};
use crate::pool::{SubmitError, WorkerPool, panic_message};
use crate::service::BackgroundService;

/// Latency of one background task execution, tagged by service name.
pub const METRIC_TASK_DURATION: &str = "background_task.duration";

/// Count of executions that returned `Ok`, tagged by service name.
pub const METRIC_TASK_SUCCESS: &str = "background_task.success";

/// Count of executions that returned an error, tagged by service name.
pub const METRIC_TASK_ERROR: &str = "background_task.error";

/// Count of executions trapped by the panic boundary, tagged by service name.
pub const METRIC_TASK_PANIC: &str = "background_task.panic";

/// Dispatches background services, instrumenting every execution.
///
/// With a pool, tasks go through the pool's bounded queue and submission
/// errors surface to the caller. Without one, each dispatch runs on its own
/// detached Tokio task and `dispatch` always returns `Ok`.
pub struct Dispatcher {
    pool: Option<WorkerPool>,
    metrics: Arc<dyn MetricsSink>,
}

impl Dispatcher {
    /// Creates a dispatcher. Pass `None` to run every task on a detached
    /// Tokio task instead of a shared pool.
    pub fn new(pool: Option<WorkerPool>) -> Self {
        Self {
            pool,
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Replaces the default no-op metrics sink.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Queues one execution of `service` and returns without waiting for it.
    ///
    /// The execution is wrapped with a span causally linked to the caller's
    /// current span (when one is active), a latency measurement, and an
    /// outcome counter. Errors returned by the service itself are consumed
    /// by that wrapper — the caller never sees them. A panicking service is
    /// likewise trapped, logged, and counted under [`METRIC_TASK_PANIC`].
    ///
    /// Must be called from within a Tokio runtime (the detached fallback
    /// path spawns onto it).
    ///
    /// # Errors
    ///
    /// Only submission-time failures propagate, and only on the pool path:
    /// [`SubmitError::QueueFull`] or [`SubmitError::Cancelled`]. The
    /// detached fallback path always returns `Ok`.
    pub fn dispatch<S>(
        &self,
        service: Arc<S>,
        locale: impl Into<String>,
        input: S::Input,
    ) -> Result<(), SubmitError>
    where
        S: BackgroundService,
    {
        let ctx = match &self.pool {
            Some(pool) => pool.cancellation_token(),
            None => CancellationToken::new(),
        };
        let run = instrumented(service, ctx, locale.into(), input, Arc::clone(&self.metrics));

        match &self.pool {
            Some(pool) => pool.submit(Box::pin(run)),
            None => {
                tokio::spawn(run);
                Ok(())
            }
        }
    }
}

/// Wraps one service execution with tracing and metrics.
///
/// The returned future owns everything it needs and reports the outcome
/// itself; whoever runs it (pool worker or detached task) just polls it to
/// completion.
fn instrumented<S>(
    service: Arc<S>,
    ctx: CancellationToken,
    locale: String,
    input: S::Input,
    metrics: Arc<dyn MetricsSink>,
) -> impl Future<Output = ()> + Send + 'static
where
    S: BackgroundService,
{
    let name = service.name().to_owned();
    let span = info_span!("background_task", service = %name);

    // Causally link to the caller's span when one is active. The task may
    // outlive the request that queued it, so this is a follows-from link,
    // not a parent-child one; with no active caller span it stays a root.
    if let Some(caller) = Span::current().id() {
        span.follows_from(caller);
    }

    async move {
        let start = Instant::now();
        // Trap panics here, where the service name is still known, so the
        // panic outcome is countable alongside plain execution errors.
        let result = AssertUnwindSafe(service.execute(ctx, &locale, input))
            .catch_unwind()
            .await;
        let elapsed = start.elapsed();

        metrics.record_latency(METRIC_TASK_DURATION, &name, elapsed);
        match result {
            Ok(Ok(())) => {
                debug!(elapsed_ms = elapsed.as_millis() as u64, "background task completed");
                metrics.increment(METRIC_TASK_SUCCESS, &name);
            }
            Ok(Err(e)) => {
                error!(
                    error = %e,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "background task failed"
                );
                metrics.increment(METRIC_TASK_ERROR, &name);
            }
            Err(payload) => {
                error!(
                    panic = panic_message(payload.as_ref()),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "background task panicked"
                );
                metrics.increment(METRIC_TASK_PANIC, &name);
            }
        }
    }
    .instrument(span)
}
