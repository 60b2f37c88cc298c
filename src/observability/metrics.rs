//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by topology, service, status
//! - `gateway_request_duration_seconds` (histogram): end-to-end latency
//! - `gateway_dispatch_retries_total` (counter): backend retries by service
//! - `gateway_deployments_total` (counter): deployments by topology, outcome
//! - `gateway_active_topologies` (gauge): topologies currently serving
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, which is what tests run with
//! - Labels stay low-cardinality: topology and service names, never paths

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape endpoint.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Record one finished gateway request.
pub fn record_request(topology: &str, service: &str, status: u16, start: Instant) {
    metrics::counter!(
        "gateway_requests_total",
        "topology" => topology.to_string(),
        "service" => service.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!(
        "gateway_request_duration_seconds",
        "topology" => topology.to_string(),
        "service" => service.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_retry(service: &str) {
    metrics::counter!("gateway_dispatch_retries_total", "service" => service.to_string())
        .increment(1);
}

/// `outcome` is one of `success`, `failure` or `removed`.
pub fn record_deployment(topology: &str, outcome: &'static str) {
    metrics::counter!(
        "gateway_deployments_total",
        "topology" => topology.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn set_active_topologies(count: usize) {
    metrics::gauge!("gateway_active_topologies").set(count as f64);
}
