//! Metrics collaborator seam.
//!
//! The orchestrator reports task latency and terminal outcomes through a
//! [`MetricsSink`]; wire it to whatever backend the host process uses.

use std::time::Duration;

/// Destination for the orchestrator's latency and outcome measurements.
///
/// `metric` is one of the crate's metric-name constants; `service` is the
/// dispatched service's [`name`](crate::service::BackgroundService::name),
/// used as a tag.
pub trait MetricsSink: Send + Sync {
    /// Records how long one execution of `service` took.
    fn record_latency(&self, metric: &'static str, service: &str, elapsed: Duration);

    /// Increments an outcome counter for `service`.
    fn increment(&self, metric: &'static str, service: &str);
}

/// Discards every measurement. The default sink when none is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_latency(&self, _metric: &'static str, _service: &str, _elapsed: Duration) {}

    fn increment(&self, _metric: &'static str, _service: &str) {}
}
