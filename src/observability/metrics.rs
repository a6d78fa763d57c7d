//! Metrics collection and exposition.
//!
//! # Metrics
//! - `ers_proxy_requests_total` (counter): client requests by method, status
//! - `ers_proxy_request_duration_seconds` (histogram): end-to-end latency
//! - `ers_proxy_session_connects_total` (counter): session creations by status
//! - `ers_proxy_session_retries_total` (counter): refresh cycles by outcome
//! - `ers_proxy_transport_errors_total` (counter): upstream failures by stage

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

pub const REQUESTS_TOTAL: &str = "ers_proxy_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "ers_proxy_request_duration_seconds";
pub const SESSION_CONNECTS_TOTAL: &str = "ers_proxy_session_connects_total";
pub const SESSION_RETRIES_TOTAL: &str = "ers_proxy_session_retries_total";
pub const TRANSPORT_ERRORS_TOTAL: &str = "ers_proxy_transport_errors_total";

/// Install the global recorder and its scrape listener on `addr`.
///
/// Must run inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    metrics::counter!(
        REQUESTS_TOTAL,
        "method" => method.to_owned(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!(REQUEST_DURATION_SECONDS).record(start.elapsed().as_secs_f64());
}

pub fn record_session_connect(status: u16) {
    metrics::counter!(SESSION_CONNECTS_TOTAL, "status" => status.to_string()).increment(1);
}

/// `outcome` is one of `retried`, `reconnect_rejected`, `reconnect_failed`.
pub fn record_retry(outcome: &'static str) {
    metrics::counter!(SESSION_RETRIES_TOTAL, "outcome" => outcome).increment(1);
}

/// `stage` is one of `connect`, `disconnect`, `forward`.
pub fn record_transport_error(stage: &'static str) {
    metrics::counter!(TRANSPORT_ERRORS_TOTAL, "stage" => stage).increment(1);
}
