//! API payload types.
//!
//! Shared by the REST handlers and the streaming channel. Decimals
//! serialize as strings.

use std::collections::BTreeMap;

use quorum_core::{ConfidenceLevel, Liquidity, Price, Side, Size, Symbol, SymbolState, VenueId};
use quorum_feed::{IngestStats, VenueHealth};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One venue's latest quote as seen by API clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceView {
    pub price: Price,
    pub received_at: i64,
    pub age_ms: i64,
    /// Within the staleness window at `timestamp` of the enclosing view.
    pub fresh: bool,
}

/// Consensus price for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceView {
    pub symbol: Symbol,
    /// `None` while consensus is unavailable.
    pub price: Option<Price>,
    pub timestamp: i64,
    pub confidence: f64,
    pub confidence_level: ConfidenceLevel,
    pub source_count: usize,
    pub sources: BTreeMap<VenueId, SourceView>,
    pub outliers: Vec<VenueId>,
    pub min: Option<Price>,
    pub max: Option<Price>,
    pub spread_pct: Option<Decimal>,
}

impl PriceView {
    pub fn from_state(state: &SymbolState, now_ms: i64, staleness_window_ms: u64) -> Self {
        let sources = state
            .per_venue
            .iter()
            .map(|(venue, vp)| {
                (
                    venue.clone(),
                    SourceView {
                        price: vp.price,
                        received_at: vp.received_at,
                        age_ms: vp.age_ms(now_ms),
                        fresh: vp.is_fresh(now_ms, staleness_window_ms),
                    },
                )
            })
            .collect();

        Self {
            symbol: state.symbol.clone(),
            price: state.consensus_price,
            timestamp: state.consensus_at.unwrap_or(now_ms),
            confidence: state.confidence,
            confidence_level: state.confidence_level,
            source_count: state.contributors.len(),
            sources,
            outliers: state.outliers.clone(),
            min: state.min,
            max: state.max,
            spread_pct: state.spread_pct,
        }
    }
}

pub type PriceMap = BTreeMap<Symbol, PriceView>;

/// `GET /prices` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricesResponse {
    pub timestamp: i64,
    pub prices: PriceMap,
}

/// `GET /prices/{symbol}/twap` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TwapResponse {
    pub symbol: Symbol,
    pub period_ms: u64,
    pub twap: Option<Price>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

/// `GET /health` response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub venues: Vec<VenueHealth>,
    pub ingest: IngestStats,
    pub subscribers: usize,
    pub publish_cycle: u64,
}

/// `POST /route` body.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteRequest {
    pub symbol: Symbol,
    pub side: Side,
    pub size: Size,
    #[serde(default)]
    pub liquidity: Liquidity,
}

/// Typed API error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

/// Server-to-client streaming frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamMessage {
    /// Sent once on connect.
    Snapshot {
        cycle: u64,
        timestamp: i64,
        prices: PriceMap,
    },
    /// Sent every publish cycle.
    Update {
        cycle: u64,
        timestamp: i64,
        prices: PriceMap,
    },
}

/// Client-to-server streaming messages.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Restrict updates to `symbols`; empty means all.
    Subscribe {
        #[serde(default)]
        symbols: Vec<String>,
    },
}
