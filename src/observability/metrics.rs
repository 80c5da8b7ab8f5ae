//! Metrics collection and exposition.
//!
//! # Metrics
//! - `relay_connections_accepted_total` (counter)
//! - `relay_connections_rejected_total` (counter): closed at the connection cap
//! - `relay_active_connections` (gauge)
//! - `relay_requests_total` (counter): by outcome (success, parse_error, ...)
//! - `relay_request_duration_seconds` (histogram): accept to teardown
//! - `relay_bytes_relayed_total` (counter): response bytes delivered
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade and is a no-op until a
//!   recorder is installed
//! - The Prometheus endpoint is opt-in; it runs off the reactor thread

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(
            address = %addr,
            error = %e,
            "Failed to install metrics exporter"
        ),
    }
}

pub fn record_accepted() {
    counter!("relay_connections_accepted_total").increment(1);
}

pub fn record_rejected() {
    counter!("relay_connections_rejected_total").increment(1);
}

pub fn set_active_connections(count: usize) {
    gauge!("relay_active_connections").set(count as f64);
}

/// Record how a relay ended.
pub fn record_outcome(outcome: &'static str, started: Instant) {
    counter!("relay_requests_total", "outcome" => outcome).increment(1);
    histogram!("relay_request_duration_seconds", "outcome" => outcome)
        .record(started.elapsed().as_secs_f64());
}

pub fn record_bytes(bytes: usize) {
    counter!("relay_bytes_relayed_total").increment(bytes as u64);
}
