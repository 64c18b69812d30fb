//! Prometheus metrics and structured logging for quorum.
//!
//! - Prometheus collectors for ingestion, adapters, publishing, commits
//!   and routing, behind the `Metrics` facade
//! - Structured logging with tracing (JSON in production)

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
