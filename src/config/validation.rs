//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses, limits and queue sizes
//! - Check that configured TLS material exists
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure apart from file existence checks
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::WsConnConfig;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address {value:?}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("tls.protocols must name at least one version")]
    NoTlsProtocols,

    #[error("{field}: file not found: {path}")]
    MissingFile { field: &'static str, path: String },

    #[error("observability.log_level: unknown level {0:?}")]
    UnknownLogLevel(String),
}

/// Check `config` for semantic errors.
pub fn validate_config(config: &WsConnConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(
        &mut errors,
        "listener.bind_address",
        &config.listener.bind_address,
    );
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::Zero {
            field: "listener.max_connections",
        });
    }
    if config.listener.backlog == 0 {
        errors.push(ValidationError::Zero {
            field: "listener.backlog",
        });
    }
    if config.streams.write_queue_depth == 0 {
        errors.push(ValidationError::Zero {
            field: "streams.write_queue_depth",
        });
    }

    if let Some(tls) = &config.tls {
        if tls.protocols.is_empty() {
            errors.push(ValidationError::NoTlsProtocols);
        }
        check_file(&mut errors, "tls.cert_path", &tls.cert_path);
        check_file(&mut errors, "tls.key_path", &tls.key_path);
    }

    let level = config.observability.log_level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ValidationError::UnknownLogLevel(
            config.observability.log_level.clone(),
        ));
    }
    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}

fn check_file(errors: &mut Vec<ValidationError>, field: &'static str, path: &str) {
    if !Path::new(path).exists() {
        errors.push(ValidationError::MissingFile {
            field,
            path: path.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::TlsConfig;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(validate_config(&WsConnConfig::default()), Ok(()));
    }

    #[test]
    fn zero_limits_are_rejected() {
        let mut config = WsConnConfig::default();
        config.listener.max_connections = 0;
        config.streams.write_queue_depth = 0;
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::Zero {
            field: "listener.max_connections"
        }));
        assert!(errors.contains(&ValidationError::Zero {
            field: "streams.write_queue_depth"
        }));
    }

    #[test]
    fn tls_section_is_checked() {
        let mut config = WsConnConfig::default();
        config.tls = Some(TlsConfig {
            cert_path: "/nonexistent/cert.pem".into(),
            key_path: "/nonexistent/key.pem".into(),
            protocols: Vec::new(),
        });
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.contains(&ValidationError::NoTlsProtocols));
    }

    #[test]
    fn metrics_address_only_checked_when_enabled() {
        let mut config = WsConnConfig::default();
        config.observability.metrics_address = "bogus".into();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        let errors = validate_config(&config).unwrap_err();
        assert!(matches!(
            errors.as_slice(),
            [ValidationError::InvalidAddress { field: "observability.metrics_address", .. }]
        ));
    }

    #[test]
    fn unknown_log_level_is_rejected() {
        let mut config = WsConnConfig::default();
        config.observability.log_level = "loud".into();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors, vec![ValidationError::UnknownLogLevel("loud".into())]);
    }
}
