//! Metrics collection and exposition.
//!
//! # Metrics
//! - `statsgate_breaker_transitions_total` (counter): by `from`, `to`
//! - `statsgate_breaker_state` (gauge): 0=closed, 1=half_open, 2=open
//! - `statsgate_upstream_requests_total` (counter): by `operation`, `outcome`
//! - `statsgate_upstream_retries_total` (counter): by `operation`
//! - `statsgate_cache_events_total` (counter): by `kind`, `outcome`
//! - `statsgate_rate_limited_total` (counter): by `reason`
//! - `statsgate_blocks_total` (counter)
//! - `statsgate_health_status` (gauge): 0=healthy, 1=degraded, 2=unhealthy
//!
//! Recording is a no-op until a recorder is installed, so library users that
//! never call [`init_metrics`] pay almost nothing.

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_breaker_transition(from: &'static str, to: &'static str) {
    counter!("statsgate_breaker_transitions_total", "from" => from, "to" => to).increment(1);
}

pub fn record_breaker_state(code: f64) {
    gauge!("statsgate_breaker_state").set(code);
}

pub fn record_upstream_request(operation: &str, outcome: &'static str) {
    counter!(
        "statsgate_upstream_requests_total",
        "operation" => operation.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_retry(operation: &str) {
    counter!("statsgate_upstream_retries_total", "operation" => operation.to_string()).increment(1);
}

pub fn record_cache_event(kind: &'static str, outcome: &'static str) {
    counter!("statsgate_cache_events_total", "kind" => kind, "outcome" => outcome).increment(1);
}

pub fn record_rate_limited(reason: &'static str) {
    counter!("statsgate_rate_limited_total", "reason" => reason).increment(1);
}

pub fn record_block() {
    counter!("statsgate_blocks_total").increment(1);
}

pub fn record_health_status(code: f64) {
    gauge!("statsgate_health_status").set(code);
}
