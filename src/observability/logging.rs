//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the global tracing subscriber
//! - Pick the log level from `RUST_LOG`, falling back to configuration
//!
//! # Design Decisions
//! - Uses the tracing crate for structured fields on every event
//! - `RUST_LOG` wins over the config file so operators can raise verbosity
//!   without editing it

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. `level` applies to this crate only.
///
/// Fails if a subscriber is already installed.
pub fn init(level: &str) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("wsconn={level}")));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init()
}
