//! Metrics collection and exposition.
//!
//! # Metrics
//! - `client_requests_total` (counter): completed calls by final status
//! - `client_retries_total` (counter): granted retries by rule
//! - `client_api_calls_total` (counter): attempts that reached the API
//! - `client_api_usage_consumed` / `client_api_usage_limit` (gauges): last
//!   reported org quota
//! - `client_token_acquisitions_total` (counter): token fetches by kind
//! - `client_observer_failures_total` (counter): observers that failed
//! - `client_warnings_total` (counter): responses carrying a `Warning` header
//! - `client_in_flight` (gauge): sends currently holding a gate slot
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Labels stay low-cardinality (status code, rule label, token kind)

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape endpoint.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_request(status: u16) {
    metrics::counter!("client_requests_total", "status" => status.to_string()).increment(1);
}

/// A call that ended without a response.
pub fn record_failed_request() {
    metrics::counter!("client_requests_total", "status" => "error").increment(1);
}

pub fn record_retry(reason: &str) {
    metrics::counter!("client_retries_total", "reason" => reason.to_string()).increment(1);
}

pub fn record_api_calls(count: u64) {
    metrics::counter!("client_api_calls_total").increment(count);
}

/// Latest org-wide usage reported by the API.
pub fn record_api_usage(consumed: u64, limit: u64) {
    metrics::gauge!("client_api_usage_consumed").set(consumed as f64);
    metrics::gauge!("client_api_usage_limit").set(limit as f64);
}

pub fn record_token_acquisition(kind: &'static str) {
    metrics::counter!("client_token_acquisitions_total", "kind" => kind).increment(1);
}

pub fn record_observer_failures(count: u64) {
    metrics::counter!("client_observer_failures_total").increment(count);
}

pub fn record_warning() {
    metrics::counter!("client_warnings_total").increment(1);
}

/// Tracks one in-flight send for as long as it lives.
#[derive(Debug)]
pub struct InFlightGuard(());

impl InFlightGuard {
    pub fn new() -> Self {
        metrics::gauge!("client_in_flight").increment(1.0);
        Self(())
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        metrics::gauge!("client_in_flight").decrement(1.0);
    }
}
