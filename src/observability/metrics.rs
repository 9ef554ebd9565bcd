//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define security-layer metrics
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `proxy_requests_total` (counter): proxied requests by method, status
//! - `proxy_request_duration_seconds` (histogram): end-to-end latency
//! - `security_pipeline_total` (counter): HTML pipeline runs by outcome
//! - `security_pipeline_duration_seconds` (histogram): time spent rewriting HTML
//! - `security_header_degraded_total` (counter): headers dropped at emission
//! - `security_rate_limited_total` (counter): rejected requests by route
//! - `security_storage_errors_total` (counter): unavailable storage by backend
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   exporter every call is a no-op (tests, CLI)
//! - Labels are low-cardinality: route patterns, never raw paths

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Installs the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
    ];
    metrics::counter!("proxy_requests_total", &labels).increment(1);
    metrics::histogram!("proxy_request_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_pipeline(outcome: &'static str, start: Instant) {
    metrics::counter!("security_pipeline_total", "outcome" => outcome).increment(1);
    metrics::histogram!("security_pipeline_duration_seconds", "outcome" => outcome)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_header_degraded(header: &'static str) {
    metrics::counter!("security_header_degraded_total", "header" => header).increment(1);
}

/// Inline hashes that had no `script-src`/`style-src` to land in.
pub fn record_hashes_dropped(directive: &'static str) {
    metrics::counter!("security_csp_hashes_dropped_total", "directive" => directive).increment(1);
}

pub fn record_rate_limited(route: &str) {
    metrics::counter!("security_rate_limited_total", "route" => route.to_string()).increment(1);
}

pub fn record_storage_error(backend: &'static str) {
    metrics::counter!("security_storage_errors_total", "backend" => backend).increment(1);
}
