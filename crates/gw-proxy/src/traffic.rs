use std::time::Duration;

/// Structured observability seam for upstream calls (spec §4.2 "[ADD]"),
/// grounded on the teacher's own `TrafficSink` abstraction: request
/// logging is ambient observability, not the out-of-scope Prometheus
/// metric emission feature, so this only ever produces `tracing` events.
pub trait TrafficSink: Send + Sync {
    fn record(&self, method: &str, url: &str, status: u16, duration: Duration);
}

/// Default sink: logs one `tracing::debug!` line per call.
pub struct NoopTrafficSink;

impl TrafficSink for NoopTrafficSink {
    fn record(&self, method: &str, url: &str, status: u16, duration: Duration) {
        tracing::debug!(method, url, status, duration_ms = duration.as_millis() as u64, "upstream call");
    }
}
