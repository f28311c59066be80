//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define dispatcher metrics (requests, latency, rejections, faults)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `waypoint_requests_total` (counter): requests by method, status, route
//! - `waypoint_request_duration_seconds` (histogram): latency distribution
//! - `waypoint_rejected_total` (counter): admission rejections by reason
//! - `waypoint_panics_total` (counter): recovered handler panics
//! - `waypoint_timeouts_total` (counter): requests cut by the timeout guard
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   exporter every call is a no-op
//! - Unmatched requests are labelled `route="unmatched"` to bound cardinality

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Route label for requests that matched no pattern.
pub const UNMATCHED_ROUTE: &str = "unmatched";

/// Install the Prometheus exporter with an HTTP listener on `addr`.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    describe();
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

fn describe() {
    metrics::describe_counter!("waypoint_requests_total", "Requests dispatched");
    metrics::describe_histogram!(
        "waypoint_request_duration_seconds",
        metrics::Unit::Seconds,
        "Time spent dispatching a request"
    );
    metrics::describe_counter!("waypoint_rejected_total", "Requests rejected by admission control");
    metrics::describe_counter!("waypoint_panics_total", "Handler panics recovered");
    metrics::describe_counter!("waypoint_timeouts_total", "Requests cut by the timeout guard");
}

/// Record a finished request.
pub fn record_request(method: &str, status: u16, route: Option<&str>, start: Instant) {
    let route = route.unwrap_or(UNMATCHED_ROUTE).to_string();
    let method = method.to_string();

    metrics::counter!(
        "waypoint_requests_total",
        "method" => method.clone(),
        "status" => status.to_string(),
        "route" => route.clone()
    )
    .increment(1);

    metrics::histogram!(
        "waypoint_request_duration_seconds",
        "method" => method,
        "route" => route
    )
    .record(start.elapsed().as_secs_f64());
}

/// Record an admission rejection (`rate_limit`, `load_shed`).
pub fn record_rejected(reason: &'static str) {
    metrics::counter!("waypoint_rejected_total", "reason" => reason).increment(1);
}

pub fn record_panic() {
    metrics::counter!("waypoint_panics_total").increment(1);
}

pub fn record_timeout() {
    metrics::counter!("waypoint_timeouts_total").increment(1);
}
