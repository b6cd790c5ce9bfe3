use lazy_static::lazy_static;
use prometheus::{
    Counter, Gauge, Histogram, register_counter, register_gauge, register_histogram,
};

lazy_static! {
    pub static ref REQUEST_TOTAL: Counter =
        register_counter!("nano_requests_total", "Total number of HTTP requests").unwrap();
    pub static ref REQUEST_LATENCY: Histogram = register_histogram!(
        "nano_request_latency_seconds",
        "HTTP request latency in seconds"
    )
    .unwrap();
    pub static ref UPSTREAM_ATTEMPTS: Counter =
        register_counter!("nano_upstream_attempts_total", "Upstream model calls attempted").unwrap();
    pub static ref UPSTREAM_RETRIES: Counter =
        register_counter!("nano_upstream_retries_total", "Upstream calls retried after a rate limit").unwrap();
    pub static ref GATE_TIMEOUTS: Counter =
        register_counter!("nano_gate_timeouts_total", "Callers turned away by the concurrency gate").unwrap();
    pub static ref UPSTREAM_IN_FLIGHT: Gauge =
        register_gauge!("nano_upstream_in_flight", "Upstream calls currently in flight").unwrap();
}

/// Holds one unit of a gauge for as long as it lives.
pub struct GaugeGuard(Gauge);

impl GaugeGuard {
    pub fn enter(gauge: &Gauge) -> Self {
        gauge.inc();
        Self(gauge.clone())
    }
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.0.dec();
    }
}
