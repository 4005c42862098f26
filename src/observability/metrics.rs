//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define connection-layer metrics (accepts, handshakes, active connections)
//! - Expose a Prometheus-compatible scrape endpoint when enabled
//!
//! # Metrics
//! - `wsconn_connections_accepted_total` (counter): peers delivered by accept
//! - `wsconn_accept_errors_total` (counter): accepts that failed
//! - `wsconn_accepts_cancelled_total` (counter): accepts resolved by close
//! - `wsconn_tls_handshakes_total` (counter): TLS upgrades by `result`
//! - `wsconn_active_connections` (gauge): connections currently tracked
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed, so library users and
//!   tests pay nothing
//! - Label values are static strings to keep cardinality fixed

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and serve it on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn connection_accepted() {
    ::metrics::counter!("wsconn_connections_accepted_total").increment(1);
}

pub fn accept_failed() {
    ::metrics::counter!("wsconn_accept_errors_total").increment(1);
}

pub fn accept_cancelled() {
    ::metrics::counter!("wsconn_accepts_cancelled_total").increment(1);
}

/// Record a TLS upgrade outcome: `success`, `failure` or `rejected`.
pub fn tls_handshake(result: &'static str) {
    ::metrics::counter!("wsconn_tls_handshakes_total", "result" => result).increment(1);
}

pub fn set_active_connections(count: usize) {
    ::metrics::gauge!("wsconn_active_connections").set(count as f64);
}
