//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::WsConnConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<WsConnConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<WsConnConfig, ConfigError> {
    let config: WsConnConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8181");
        assert_eq!(config.listener.backlog, 128);
        assert!(config.listener.no_delay);
        assert!(config.tls.is_none());
        assert_eq!(config.streams.write_queue_depth, 64);
    }

    #[test]
    fn sections_override_defaults() {
        let config = parse_config(
            r#"
            [listener]
            bind_address = "127.0.0.1:9000"
            backlog = 16
            no_delay = false

            [streams]
            write_queue_depth = 8

            [observability]
            log_level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.listener.bind_address, "127.0.0.1:9000");
        assert_eq!(config.listener.backlog, 16);
        assert!(!config.listener.no_delay);
        assert_eq!(config.listener.max_connections, 10_000);
        assert_eq!(config.streams.write_queue_depth, 8);
        assert_eq!(config.observability.log_level, "debug");
    }

    #[test]
    fn syntax_error_is_parse_error() {
        let err = parse_config("[listener\nbacklog = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn all_validation_errors_are_reported() {
        let err = parse_config(
            r#"
            [listener]
            bind_address = "nowhere"
            max_connections = 0
            "#,
        )
        .unwrap_err();
        let ConfigError::Validation(errors) = &err else {
            panic!("expected validation error, got {err}");
        };
        assert_eq!(errors.len(), 2);
        assert!(err.to_string().starts_with("Validation failed: "));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config(Path::new("/nonexistent/wsconn.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
