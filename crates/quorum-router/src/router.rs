//! Venue selection.
//!
//! Candidates are the fresh, non-degraded venue quotes in an aggregator
//! snapshot that have a fee entry. Buy ranks ascending on fee-adjusted
//! price, sell descending. Prices within `tie_epsilon` of a group leader
//! are ordered by quote confidence, then failure rate, then venue id.

use crate::error::{RouterError, RouterResult};
use crate::fee::FeeTable;
use quorum_core::{now_ms, Liquidity, Price, Side, Size, Symbol, VenueId};
use quorum_feed::{Aggregator, VenueHealthRegistry};
use quorum_telemetry::Metrics;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

/// Router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Absolute effective-price distance treated as a tie.
    #[serde(default = "default_tie_epsilon")]
    pub tie_epsilon: Decimal,
}

fn default_tie_epsilon() -> Decimal {
    Decimal::new(1, 8)
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            tie_epsilon: default_tie_epsilon(),
        }
    }
}

/// One ranked venue.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteCandidate {
    pub venue: VenueId,
    pub quote: Price,
    pub effective_price: Price,
    pub fee_bps: Decimal,
    /// Fee in quote currency for the requested size.
    pub effective_fee: Decimal,
    /// `1 - age / staleness window`.
    pub confidence: f64,
    pub failure_rate: f64,
    pub age_ms: i64,
}

/// Result of a routing request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDecision {
    pub symbol: Symbol,
    pub side: Side,
    pub size: Size,
    pub liquidity: Liquidity,
    pub chosen_venue: VenueId,
    pub effective_price: Price,
    pub effective_fee: Decimal,
    pub fee_bps: Decimal,
    /// Consensus confidence of the symbol at decision time.
    pub confidence: f64,
    pub decided_at: i64,
    /// Remaining candidates, best first.
    pub alternatives: Vec<RouteCandidate>,
    /// Venues with a fresh quote but no fee entry.
    pub excluded: Vec<VenueId>,
}

/// Fee-aware router over aggregator snapshots.
pub struct Router {
    aggregator: Arc<Aggregator>,
    fees: Arc<FeeTable>,
    health: Arc<VenueHealthRegistry>,
    config: RouterConfig,
}

impl Router {
    pub fn new(
        aggregator: Arc<Aggregator>,
        fees: Arc<FeeTable>,
        health: Arc<VenueHealthRegistry>,
        config: RouterConfig,
    ) -> Self {
        Self {
            aggregator,
            fees,
            health,
            config,
        }
    }

    pub fn fees(&self) -> &FeeTable {
        &self.fees
    }

    pub fn route(
        &self,
        symbol: &Symbol,
        side: Side,
        size: Size,
        liquidity: Liquidity,
    ) -> RouterResult<RouteDecision> {
        self.route_at(symbol, side, size, liquidity, now_ms())
    }

    /// Route against the aggregator state as of `now_ms`.
    pub fn route_at(
        &self,
        symbol: &Symbol,
        side: Side,
        size: Size,
        liquidity: Liquidity,
        now_ms: i64,
    ) -> RouterResult<RouteDecision> {
        let result = self.decide(symbol, side, size, liquidity, now_ms);
        match &result {
            Ok(decision) => {
                Metrics::route_request("ok");
                debug!(
                    %symbol,
                    %side,
                    venue = %decision.chosen_venue,
                    effective_price = %decision.effective_price,
                    alternatives = decision.alternatives.len(),
                    "Route decided"
                );
            }
            Err(e) => {
                Metrics::route_request(e.code());
                debug!(%symbol, %side, error = %e, "Route rejected");
            }
        }
        result
    }

    fn decide(
        &self,
        symbol: &Symbol,
        side: Side,
        size: Size,
        liquidity: Liquidity,
        now_ms: i64,
    ) -> RouterResult<RouteDecision> {
        if !size.is_positive() {
            return Err(RouterError::InvalidSize(size.to_string()));
        }

        let no_liquidity = |unknown_fee_venues: Vec<VenueId>| RouterError::NoLiquidity {
            symbol: symbol.clone(),
            unknown_fee_venues,
        };
        let Some(state) = self.aggregator.snapshot_at(symbol, now_ms) else {
            return Err(no_liquidity(Vec::new()));
        };

        let window = self.aggregator.config().staleness_window_ms;
        let mut candidates = Vec::new();
        let mut excluded = Vec::new();

        for (venue, quote) in state.fresh_venues(now_ms, window) {
            if self.aggregator.is_degraded(venue) {
                continue;
            }
            let Some(fee_bps) = self.fees.fee_bps(venue, liquidity) else {
                warn!(%venue, %symbol, "Venue has no fee entry, excluded from routing");
                excluded.push(venue.clone());
                continue;
            };

            let effective_price = match side {
                Side::Buy => quote.price.with_bps(fee_bps),
                Side::Sell => quote.price.with_bps(-fee_bps),
            };
            let age_ms = quote.age_ms(now_ms);
            candidates.push(RouteCandidate {
                venue: venue.clone(),
                quote: quote.price,
                effective_price,
                fee_bps,
                effective_fee: size.notional(quote.price) * fee_bps / Decimal::from(10000),
                confidence: quote_confidence(age_ms, window),
                failure_rate: self.health.failure_rate(venue),
                age_ms,
            });
        }

        if candidates.is_empty() {
            return Err(no_liquidity(excluded));
        }

        self.rank(&mut candidates, side);
        let mut ranked = candidates.into_iter();
        let Some(best) = ranked.next() else {
            return Err(no_liquidity(excluded));
        };

        Ok(RouteDecision {
            symbol: symbol.clone(),
            side,
            size,
            liquidity,
            chosen_venue: best.venue,
            effective_price: best.effective_price,
            effective_fee: best.effective_fee,
            fee_bps: best.fee_bps,
            confidence: state.confidence,
            decided_at: now_ms,
            alternatives: ranked.collect(),
            excluded,
        })
    }

    fn rank(&self, candidates: &mut [RouteCandidate], side: Side) {
        candidates.sort_by(|a, b| match side {
            Side::Buy => a.effective_price.cmp(&b.effective_price),
            Side::Sell => b.effective_price.cmp(&a.effective_price),
        });

        let epsilon = self.config.tie_epsilon;
        let mut start = 0;
        while start < candidates.len() {
            let leader = candidates[start].effective_price.inner();
            let mut end = start + 1;
            while end < candidates.len()
                && (candidates[end].effective_price.inner() - leader).abs() <= epsilon
            {
                end += 1;
            }
            candidates[start..end].sort_by(tie_break);
            start = end;
        }
    }
}

fn quote_confidence(age_ms: i64, window_ms: u64) -> f64 {
    if window_ms == 0 {
        return 1.0;
    }
    (1.0 - age_ms as f64 / window_ms as f64).clamp(0.0, 1.0)
}

fn tie_break(a: &RouteCandidate, b: &RouteCandidate) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| a.failure_rate.total_cmp(&b.failure_rate))
        .then_with(|| a.venue.cmp(&b.venue))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fee::VenueFee;
    use quorum_core::Tick;
    use quorum_feed::{AdapterStatus, AggregatorConfig, StatusEvent};
    use rust_decimal_macros::dec;

    const T0: i64 = 1_700_000_000_000;

    fn sym() -> Symbol {
        Symbol::new("BTC").unwrap()
    }

    fn venue(id: &str) -> VenueId {
        VenueId::new(id).unwrap()
    }

    struct Fixture {
        aggregator: Arc<Aggregator>,
        health: Arc<VenueHealthRegistry>,
        router: Router,
    }

    fn fixture(fees: Vec<VenueFee>) -> Fixture {
        let aggregator = Arc::new(Aggregator::new(AggregatorConfig {
            configured_venues: 3,
            ..AggregatorConfig::default()
        }));
        let health = Arc::new(VenueHealthRegistry::new());
        let router = Router::new(
            aggregator.clone(),
            Arc::new(FeeTable::new(fees).unwrap()),
            health.clone(),
            RouterConfig::default(),
        );
        Fixture {
            aggregator,
            health,
            router,
        }
    }

    fn flat_fees(venues: &[&str], taker: Decimal) -> Vec<VenueFee> {
        venues
            .iter()
            .map(|v| VenueFee::new(venue(v), dec!(0), taker))
            .collect()
    }

    fn quote(agg: &Aggregator, v: &str, price: Decimal, seq: u64, at: i64) {
        let tick = Tick {
            symbol: sym(),
            venue: venue(v),
            price: Price::new(price),
            timestamp: at,
            sequence_id: seq,
        };
        agg.ingest_at(&tick, at).unwrap();
    }

    fn size(v: Decimal) -> Size {
        Size::new(v)
    }

    #[test]
    fn test_single_venue_buy_applies_taker_fee() {
        let f = fixture(vec![VenueFee::new(venue("a"), dec!(2), dec!(10))]);
        quote(&f.aggregator, "a", dec!(100), 1, T0);

        let d = f
            .router
            .route_at(&sym(), Side::Buy, size(dec!(2)), Liquidity::Taker, T0)
            .unwrap();
        assert_eq!(d.chosen_venue, venue("a"));
        assert_eq!(d.effective_price, Price::new(dec!(100.1)));
        assert_eq!(d.fee_bps, dec!(10));
        assert_eq!(d.effective_fee, dec!(0.2));
        assert!(d.alternatives.is_empty());
    }

    #[test]
    fn test_sell_receives_less_and_maker_uses_maker_fee() {
        let f = fixture(vec![VenueFee::new(venue("a"), dec!(-1), dec!(10))]);
        quote(&f.aggregator, "a", dec!(100), 1, T0);

        let taker = f
            .router
            .route_at(&sym(), Side::Sell, size(dec!(1)), Liquidity::Taker, T0)
            .unwrap();
        assert_eq!(taker.effective_price, Price::new(dec!(99.9)));

        let maker = f
            .router
            .route_at(&sym(), Side::Sell, size(dec!(1)), Liquidity::Maker, T0)
            .unwrap();
        assert_eq!(maker.effective_price, Price::new(dec!(100.01)));
    }

    #[test]
    fn test_ranking_by_side() {
        let f = fixture(flat_fees(&["a", "b", "c"], dec!(10)));
        quote(&f.aggregator, "a", dec!(100.00), 1, T0);
        quote(&f.aggregator, "b", dec!(100.30), 1, T0);
        quote(&f.aggregator, "c", dec!(100.10), 1, T0);

        let buy = f
            .router
            .route_at(&sym(), Side::Buy, size(dec!(1)), Liquidity::Taker, T0)
            .unwrap();
        assert_eq!(buy.chosen_venue, venue("a"));
        let order: Vec<_> = buy.alternatives.iter().map(|c| c.venue.as_str()).collect();
        assert_eq!(order, vec!["c", "b"]);

        let sell = f
            .router
            .route_at(&sym(), Side::Sell, size(dec!(1)), Liquidity::Taker, T0)
            .unwrap();
        assert_eq!(sell.chosen_venue, venue("b"));
    }

    #[test]
    fn test_fee_changes_the_winner() {
        let f = fixture(vec![
            VenueFee::new(venue("a"), dec!(0), dec!(50)),
            VenueFee::new(venue("b"), dec!(0), dec!(5)),
        ]);
        quote(&f.aggregator, "a", dec!(100.00), 1, T0);
        quote(&f.aggregator, "b", dec!(100.30), 1, T0);

        // a: 100.5, b: 100.35015
        let d = f
            .router
            .route_at(&sym(), Side::Buy, size(dec!(1)), Liquidity::Taker, T0)
            .unwrap();
        assert_eq!(d.chosen_venue, venue("b"));
    }

    #[test]
    fn test_stale_venue_never_chosen() {
        let f = fixture(flat_fees(&["a", "b"], dec!(10)));
        quote(&f.aggregator, "a", dec!(90), 1, T0);
        quote(&f.aggregator, "b", dec!(100), 1, T0 + 4000);

        let d = f
            .router
            .route_at(&sym(), Side::Buy, size(dec!(1)), Liquidity::Taker, T0 + 6000)
            .unwrap();
        assert_eq!(d.chosen_venue, venue("b"));
        assert!(d.alternatives.is_empty());

        let none = f
            .router
            .route_at(&sym(), Side::Buy, size(dec!(1)), Liquidity::Taker, T0 + 10_000);
        assert!(matches!(none, Err(RouterError::NoLiquidity { .. })));
    }

    #[test]
    fn test_tie_prefers_fresher_quote() {
        let f = fixture(flat_fees(&["a", "b"], dec!(10)));
        quote(&f.aggregator, "a", dec!(100), 1, T0);
        quote(&f.aggregator, "b", dec!(100), 1, T0 + 1000);

        let d = f
            .router
            .route_at(&sym(), Side::Buy, size(dec!(1)), Liquidity::Taker, T0 + 1000)
            .unwrap();
        assert_eq!(d.chosen_venue, venue("b"));
        assert!((d.alternatives[0].confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_tie_then_failure_rate_then_venue_id() {
        let f = fixture(flat_fees(&["a", "b", "c"], dec!(10)));
        quote(&f.aggregator, "a", dec!(100), 1, T0);
        quote(&f.aggregator, "b", dec!(100), 1, T0);
        quote(&f.aggregator, "c", dec!(100.000000001), 1, T0);

        let d = f
            .router
            .route_at(&sym(), Side::Buy, size(dec!(1)), Liquidity::Taker, T0)
            .unwrap();
        assert_eq!(d.chosen_venue, venue("a"));

        f.health.apply(&StatusEvent {
            venue: venue("a"),
            status: AdapterStatus::Healthy,
            consecutive_failures: 0,
            total_failures: 1,
            total_sessions: 4,
            detail: None,
            at_ms: T0,
        });
        let d = f
            .router
            .route_at(&sym(), Side::Buy, size(dec!(1)), Liquidity::Taker, T0)
            .unwrap();
        assert_eq!(d.chosen_venue, venue("b"));
        let order: Vec<_> = d.alternatives.iter().map(|c| c.venue.as_str()).collect();
        assert_eq!(order, vec!["c", "a"]);
    }

    #[test]
    fn test_unknown_fee_excluded() {
        let f = fixture(flat_fees(&["a"], dec!(10)));
        quote(&f.aggregator, "a", dec!(101), 1, T0);
        quote(&f.aggregator, "b", dec!(100), 1, T0);

        let d = f
            .router
            .route_at(&sym(), Side::Buy, size(dec!(1)), Liquidity::Taker, T0)
            .unwrap();
        assert_eq!(d.chosen_venue, venue("a"));
        assert_eq!(d.excluded, vec![venue("b")]);
    }

    #[test]
    fn test_all_unknown_fees_is_no_liquidity() {
        let f = fixture(Vec::new());
        quote(&f.aggregator, "a", dec!(100), 1, T0);
        quote(&f.aggregator, "b", dec!(100), 1, T0);

        let err = f
            .router
            .route_at(&sym(), Side::Buy, size(dec!(1)), Liquidity::Taker, T0)
            .unwrap_err();
        assert_eq!(
            err,
            RouterError::NoLiquidity {
                symbol: sym(),
                unknown_fee_venues: vec![venue("a"), venue("b")],
            }
        );
        assert_eq!(err.code(), "no_liquidity");
    }

    #[test]
    fn test_degraded_venue_skipped() {
        let f = fixture(flat_fees(&["a", "b"], dec!(10)));
        quote(&f.aggregator, "a", dec!(99), 1, T0);
        quote(&f.aggregator, "b", dec!(100), 1, T0);
        f.aggregator.set_venue_degraded(&venue("a"), true);

        let d = f
            .router
            .route_at(&sym(), Side::Buy, size(dec!(1)), Liquidity::Taker, T0)
            .unwrap();
        assert_eq!(d.chosen_venue, venue("b"));
    }

    #[test]
    fn test_invalid_size_and_unknown_symbol() {
        let f = fixture(flat_fees(&["a"], dec!(10)));
        quote(&f.aggregator, "a", dec!(100), 1, T0);

        let err = f
            .router
            .route_at(&sym(), Side::Buy, size(dec!(0)), Liquidity::Taker, T0)
            .unwrap_err();
        assert_eq!(err.code(), "invalid_size");

        let eth = Symbol::new("ETH").unwrap();
        assert!(matches!(
            f.router
                .route_at(&eth, Side::Buy, size(dec!(1)), Liquidity::Taker, T0),
            Err(RouterError::NoLiquidity { .. })
        ));
    }

    #[test]
    fn test_decision_carries_consensus_confidence() {
        let f = fixture(flat_fees(&["a", "b"], dec!(10)));
        quote(&f.aggregator, "a", dec!(100.00), 1, T0);
        quote(&f.aggregator, "b", dec!(100.30), 1, T0);

        let d = f
            .router
            .route_at(&sym(), Side::Buy, size(dec!(1)), Liquidity::Taker, T0)
            .unwrap();
        assert!((d.confidence - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(d.chosen_venue, venue("a"));
    }
}
