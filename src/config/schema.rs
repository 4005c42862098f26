//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML. Every field
//! has a default, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};

use crate::net::queued::DEFAULT_QUEUE_DEPTH;
use crate::net::tls::{TlsProtocols, TlsVersion};

/// Root configuration for the connection server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct WsConnConfig {
    /// Listening socket settings.
    pub listener: ListenerConfig,

    /// TLS upgrade for accepted connections. Plain TCP when absent.
    pub tls: Option<TlsConfig>,

    /// Per-connection stream settings.
    pub streams: StreamConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8181").
    pub bind_address: String,

    /// Pending-connection queue length passed to listen.
    pub backlog: u32,

    /// Disable Nagle's algorithm on accepted connections.
    pub no_delay: bool,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Seconds to wait for open connections to finish after shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8181".to_string(),
            backlog: 128,
            no_delay: true,
            max_connections: 10_000,
            shutdown_timeout_secs: 10,
        }
    }
}

/// TLS configuration for accepted connections.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate chain file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,

    /// Protocol versions allowed during the handshake.
    #[serde(default = "default_protocols")]
    pub protocols: Vec<TlsVersion>,
}

impl TlsConfig {
    /// TLS from the given PEM files with every supported protocol version.
    pub fn new(cert_path: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            protocols: default_protocols(),
        }
    }

    pub fn protocol_set(&self) -> TlsProtocols {
        self.protocols.iter().copied().collect()
    }
}

fn default_protocols() -> Vec<TlsVersion> {
    vec![TlsVersion::Tls12, TlsVersion::Tls13]
}

/// Stream configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Queued writes per TLS stream before writers wait.
    pub write_queue_depth: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            write_queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
