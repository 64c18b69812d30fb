//! quorum - multi-venue price consensus and routing service.
//!
//! Wires source adapters, the aggregator, the router, the publisher, the
//! commit sink and the API server into one process.

pub mod app;
pub mod config;
pub mod error;

pub use crate::app::{Application, RunningApp};
pub use crate::config::{AppConfig, VenueConfig, VenueKind, WsConfig};
pub use crate::error::{AppError, AppResult};
