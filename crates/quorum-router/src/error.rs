//! Router error types.

use quorum_core::{Symbol, VenueId};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    /// No venue has a fresh quote with a known fee. `unknown_fee_venues`
    /// lists venues that quoted but had no fee entry.
    #[error("No liquidity for {symbol}")]
    NoLiquidity {
        symbol: Symbol,
        unknown_fee_venues: Vec<VenueId>,
    },

    #[error("Invalid size: {0}")]
    InvalidSize(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl RouterError {
    /// Stable code for API responses and metrics.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoLiquidity { .. } => "no_liquidity",
            Self::InvalidSize(_) => "invalid_size",
            Self::ConfigError(_) => "config_error",
        }
    }
}

pub type RouterResult<T> = Result<T, RouterError>;
