//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! net and server layers produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters and gauges via the metrics facade)
//!
//! Consumers:
//!     → stdout (tracing-subscriber fmt layer)
//!     → Prometheus scrape endpoint (optional)
//! ```

pub mod logging;
pub mod metrics;
