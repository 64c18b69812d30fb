//! Core domain types for the quorum price aggregator.
//!
//! This crate provides the types shared by every other crate:
//! - `Price`, `Size`: precision-safe numeric types
//! - `Symbol`, `VenueId`: normalized identifiers
//! - `Tick`: one normalized price observation
//! - `SymbolState`: a reader's copy of aggregated per-symbol state

pub mod decimal;
pub mod error;
pub mod state;
pub mod types;

pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use state::{ConfidenceLevel, SymbolState, VenuePrice};
pub use types::{now_ms, Liquidity, Side, Symbol, Tick, VenueId};
