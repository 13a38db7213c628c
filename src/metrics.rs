//! Metrics seam: the Integration facade emits counts and durations
//! through this trait; hosts wire it to whatever backend they run.

use std::time::Duration;

/// Host-provided metrics sink. Mirrors the `DbExecutor` seam in spirit:
/// a plain trait implemented by the host, not a concrete backend shipped
/// here. Calls are synchronous and expected to be cheap (buffering,
/// not blocking I/O) — it is called on the request path.
pub trait MetricsSink: Send + Sync {
    fn increment_counter(&self, name: &str, tags: &[(&str, &str)]);
    fn record_duration(&self, name: &str, duration: Duration, tags: &[(&str, &str)]);
}

/// A sink that discards everything, used when the host wires nothing up.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn increment_counter(&self, _name: &str, _tags: &[(&str, &str)]) {}
    fn record_duration(&self, _name: &str, _duration: Duration, _tags: &[(&str, &str)]) {}
}
