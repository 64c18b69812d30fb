//! Per-symbol aggregated state as handed out to readers.
//!
//! `SymbolState` values are always copies; the aggregator never lends out
//! its internal entries.

use crate::decimal::Price;
use crate::types::{Symbol, VenueId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Latest accepted quote from one venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VenuePrice {
    pub price: Price,
    /// Local receive time (epoch ms). Staleness is measured from here.
    pub received_at: i64,
    /// Venue event time (epoch ms).
    pub source_timestamp: i64,
    pub sequence_id: u64,
}

impl VenuePrice {
    #[inline]
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.received_at)
    }

    #[inline]
    pub fn is_fresh(&self, now_ms: i64, staleness_window_ms: u64) -> bool {
        self.age_ms(now_ms) <= staleness_window_ms as i64
    }
}

/// Coarse reliability bucket for a consensus value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    #[default]
    Unavailable,
    Low,
    Medium,
    High,
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable => write!(f, "unavailable"),
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Snapshot of one symbol's aggregated state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolState {
    pub symbol: Symbol,
    /// Every venue that has ever reported this symbol, fresh or not.
    pub per_venue: BTreeMap<VenueId, VenuePrice>,
    pub consensus_price: Option<Price>,
    /// Time (epoch ms) the consensus was computed.
    pub consensus_at: Option<i64>,
    /// Contributing venues over configured venues, 0.0 to 1.0.
    pub confidence: f64,
    pub confidence_level: ConfidenceLevel,
    /// Venues averaged into the consensus.
    pub contributors: Vec<VenueId>,
    /// Fresh venues dropped by the outlier filter.
    pub outliers: Vec<VenueId>,
    /// Range over the fresh set.
    pub min: Option<Price>,
    pub max: Option<Price>,
    pub spread_pct: Option<Decimal>,
}

impl SymbolState {
    /// Empty state for a symbol nobody has quoted yet.
    pub fn empty(symbol: Symbol) -> Self {
        Self {
            symbol,
            per_venue: BTreeMap::new(),
            consensus_price: None,
            consensus_at: None,
            confidence: 0.0,
            confidence_level: ConfidenceLevel::Unavailable,
            contributors: Vec::new(),
            outliers: Vec::new(),
            min: None,
            max: None,
            spread_pct: None,
        }
    }

    #[inline]
    pub fn is_available(&self) -> bool {
        self.consensus_price.is_some()
    }

    /// Venues whose quote is within the staleness window at `now_ms`.
    pub fn fresh_venues(
        &self,
        now_ms: i64,
        staleness_window_ms: u64,
    ) -> impl Iterator<Item = (&VenueId, &VenuePrice)> {
        self.per_venue
            .iter()
            .filter(move |(_, vp)| vp.is_fresh(now_ms, staleness_window_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn vp(price: Decimal, received_at: i64) -> VenuePrice {
        VenuePrice {
            price: Price::new(price),
            received_at,
            source_timestamp: received_at,
            sequence_id: 1,
        }
    }

    #[test]
    fn test_freshness_boundary() {
        let quote = vp(dec!(100), 1_000);
        assert!(quote.is_fresh(6_000, 5_000));
        assert!(!quote.is_fresh(6_001, 5_000));
        assert_eq!(quote.age_ms(500), 0);
    }

    #[test]
    fn test_fresh_venues_filters_stale() {
        let mut state = SymbolState::empty(Symbol::new("BTC").unwrap());
        state
            .per_venue
            .insert(VenueId::new("a").unwrap(), vp(dec!(100), 10_000));
        state
            .per_venue
            .insert(VenueId::new("b").unwrap(), vp(dec!(101), 1_000));

        let fresh: Vec<_> = state.fresh_venues(12_000, 5_000).map(|(v, _)| v.as_str()).collect();
        assert_eq!(fresh, vec!["a"]);
        assert!(!state.is_available());
    }
}
