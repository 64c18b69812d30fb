//! Feed error types.

use quorum_core::{Symbol, VenueId};
use thiserror::Error;

/// Adapter-side failures. Transient: the supervisor retries with backoff.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("No venue symbol mapped for {0}")]
    UnmappedSymbol(Symbol),

    #[error("Event channel closed")]
    ChannelClosed,

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("WebSocket error: {0}")]
    Ws(#[from] quorum_ws::WsError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type FeedResult<T> = Result<T, FeedError>;

/// Why the aggregator refused a tick. Counted, never propagated further.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestionRejected {
    #[error("Invalid price {price} from {venue} for {symbol}")]
    InvalidPrice {
        symbol: Symbol,
        venue: VenueId,
        price: String,
    },

    #[error("Out-of-order tick from {venue} for {symbol}: seq {sequence_id} <= last {last_sequence_id}")]
    OutOfOrder {
        symbol: Symbol,
        venue: VenueId,
        sequence_id: u64,
        last_sequence_id: u64,
    },
}

impl IngestionRejected {
    /// Metric label for the rejection reason.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidPrice { .. } => "invalid_price",
            Self::OutOfOrder { .. } => "out_of_order",
        }
    }
}
