//! Metrics helpers.
use crate::time;

/// Observing latencies measured with the context clock.
pub trait LatencyHistogramExt {
    /// Observes a latency. Negative latencies are observed as zero.
    fn observe_latency(&self, latency: time::Duration);
}

impl LatencyHistogramExt for vise::Histogram<std::time::Duration> {
    fn observe_latency(&self, latency: time::Duration) {
        self.observe(latency.try_into().unwrap_or_default());
    }
}
