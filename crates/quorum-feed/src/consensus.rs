//! Consensus price computation.
//!
//! Pure functions over a symbol's per-venue quotes. The aggregator calls
//! `compute` on every accepted tick and again on every snapshot, always
//! with an explicit `now_ms`, so staleness is judged at read time.

use quorum_core::{ConfidenceLevel, Price, VenueId, VenuePrice};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashSet};

/// Inputs that stay fixed for an aggregator's lifetime.
#[derive(Debug, Clone)]
pub struct ConsensusParams {
    pub staleness_window_ms: u64,
    /// Maximum distance from the median, in percent.
    pub outlier_threshold_pct: Decimal,
    /// Venues expected to quote each symbol. 0 = count what has been seen.
    pub configured_venues: usize,
}

/// Result of one consensus computation.
#[derive(Debug, Clone, PartialEq)]
pub struct Consensus {
    pub price: Option<Price>,
    pub confidence: f64,
    pub level: ConfidenceLevel,
    pub contributors: Vec<VenueId>,
    pub outliers: Vec<VenueId>,
    pub min: Option<Price>,
    pub max: Option<Price>,
    pub spread_pct: Option<Decimal>,
}

impl Consensus {
    fn unavailable() -> Self {
        Self {
            price: None,
            confidence: 0.0,
            level: ConfidenceLevel::Unavailable,
            contributors: Vec::new(),
            outliers: Vec::new(),
            min: None,
            max: None,
            spread_pct: None,
        }
    }
}

/// Median of an ascending slice.
///
/// With an even count the two middle values are a tie; the one closer to
/// `anchor` wins so that a venue flapping around the threshold cannot drag
/// the median back and forth. Without an anchor, or when both are equally
/// close, the midpoint is used.
pub fn anchored_median(sorted: &[Decimal], anchor: Option<Decimal>) -> Option<Decimal> {
    let n = sorted.len();
    if n == 0 {
        return None;
    }
    if n % 2 == 1 {
        return Some(sorted[n / 2]);
    }

    let lo = sorted[n / 2 - 1];
    let hi = sorted[n / 2];
    let midpoint = (lo + hi) / Decimal::TWO;
    match anchor {
        Some(a) => {
            let d_lo = (lo - a).abs();
            let d_hi = (hi - a).abs();
            if d_lo < d_hi {
                Some(lo)
            } else if d_hi < d_lo {
                Some(hi)
            } else {
                Some(midpoint)
            }
        }
        None => Some(midpoint),
    }
}

/// Whether `price` lies farther than `threshold_pct` percent from `median`.
pub fn is_outlier(price: Decimal, median: Decimal, threshold_pct: Decimal) -> bool {
    if median.is_zero() {
        return false;
    }
    (price - median).abs() / median * Decimal::ONE_HUNDRED > threshold_pct
}

/// Compute consensus over `per_venue` at `now_ms`.
///
/// Stale quotes and quotes from `degraded` venues are ignored. `anchor` is
/// the previous consensus for this symbol, if any.
pub fn compute(
    per_venue: &BTreeMap<VenueId, VenuePrice>,
    degraded: &HashSet<VenueId>,
    now_ms: i64,
    params: &ConsensusParams,
    anchor: Option<Price>,
) -> Consensus {
    let fresh: Vec<(&VenueId, Decimal)> = per_venue
        .iter()
        .filter(|(venue, vp)| {
            !degraded.contains(*venue) && vp.is_fresh(now_ms, params.staleness_window_ms)
        })
        .map(|(venue, vp)| (venue, vp.price.inner()))
        .collect();

    if fresh.is_empty() {
        return Consensus::unavailable();
    }

    let min = fresh.iter().map(|(_, p)| *p).min();
    let max = fresh.iter().map(|(_, p)| *p).max();
    let spread_pct = match (min, max) {
        (Some(lo), Some(hi)) if !lo.is_zero() => Some((hi - lo) / lo * Decimal::ONE_HUNDRED),
        _ => None,
    };

    let configured = params.configured_venues.max(per_venue.len()).max(1);

    let (contributors, outliers): (Vec<_>, Vec<_>) = if fresh.len() == 1 {
        (fresh, Vec::new())
    } else {
        let mut sorted: Vec<Decimal> = fresh.iter().map(|(_, p)| *p).collect();
        sorted.sort();
        let median = anchored_median(&sorted, anchor.map(|a| a.inner()));
        match median {
            Some(m) => fresh
                .into_iter()
                .partition(|(_, p)| !is_outlier(*p, m, params.outlier_threshold_pct)),
            None => (fresh, Vec::new()),
        }
    };

    let outlier_ids: Vec<VenueId> = outliers.iter().map(|(v, _)| (*v).clone()).collect();
    if contributors.is_empty() {
        return Consensus {
            outliers: outlier_ids,
            min: min.map(Price::new),
            max: max.map(Price::new),
            spread_pct,
            ..Consensus::unavailable()
        };
    }

    let sum: Decimal = contributors.iter().map(|(_, p)| *p).sum();
    let mean = sum / Decimal::from(contributors.len());

    let confidence = (contributors.len() as f64 / configured as f64).min(1.0);
    let level = if contributors.len() == 1 {
        ConfidenceLevel::Low
    } else if contributors.len() * 3 >= configured * 2 {
        ConfidenceLevel::High
    } else {
        ConfidenceLevel::Medium
    };

    Consensus {
        price: Some(Price::new(mean)),
        confidence,
        level,
        contributors: contributors.iter().map(|(v, _)| (*v).clone()).collect(),
        outliers: outlier_ids,
        min: min.map(Price::new),
        max: max.map(Price::new),
        spread_pct,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const NOW: i64 = 1_700_000_000_000;

    fn params(configured: usize) -> ConsensusParams {
        ConsensusParams {
            staleness_window_ms: 5000,
            outlier_threshold_pct: dec!(1.5),
            configured_venues: configured,
        }
    }

    fn quotes(entries: &[(&str, Decimal, i64)]) -> BTreeMap<VenueId, VenuePrice> {
        entries
            .iter()
            .enumerate()
            .map(|(i, (venue, price, age))| {
                (
                    VenueId::new(venue).unwrap(),
                    VenuePrice {
                        price: Price::new(*price),
                        received_at: NOW - age,
                        source_timestamp: NOW - age,
                        sequence_id: i as u64 + 1,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_outlier_excluded_from_mean() {
        let q = quotes(&[("a", dec!(100), 0), ("b", dec!(100.2), 0), ("c", dec!(130), 0)]);
        let c = compute(&q, &HashSet::new(), NOW, &params(3), None);

        assert_eq!(c.price, Some(Price::new(dec!(100.1))));
        assert_eq!(c.outliers, vec![VenueId::new("c").unwrap()]);
        assert_eq!(c.contributors.len(), 2);
        assert_eq!(c.level, ConfidenceLevel::High);
    }

    #[test]
    fn test_two_of_three_configured() {
        let q = quotes(&[("a", dec!(100.00), 10), ("b", dec!(100.30), 20)]);
        let c = compute(&q, &HashSet::new(), NOW, &params(3), None);

        assert_eq!(c.price, Some(Price::new(dec!(100.15))));
        assert!((c.confidence - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(c.min, Some(Price::new(dec!(100.00))));
        assert_eq!(c.max, Some(Price::new(dec!(100.30))));
        assert_eq!(c.spread_pct, Some(dec!(0.3)));
    }

    #[test]
    fn test_no_fresh_entries_is_unavailable() {
        let q = quotes(&[("a", dec!(100), 5001)]);
        let c = compute(&q, &HashSet::new(), NOW, &params(2), Some(Price::new(dec!(100))));

        assert_eq!(c.price, None);
        assert_eq!(c.confidence, 0.0);
        assert_eq!(c.level, ConfidenceLevel::Unavailable);
    }

    #[test]
    fn test_single_fresh_entry_is_low_confidence() {
        let q = quotes(&[("a", dec!(101), 100), ("b", dec!(99), 9000)]);
        let c = compute(&q, &HashSet::new(), NOW, &params(1), None);

        assert_eq!(c.price, Some(Price::new(dec!(101))));
        assert_eq!(c.level, ConfidenceLevel::Low);
        // b has been seen, so it counts as configured even with params(1)
        assert!((c.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_degraded_venue_ignored() {
        let q = quotes(&[("a", dec!(100), 0), ("b", dec!(102), 0)]);
        let degraded: HashSet<_> = [VenueId::new("b").unwrap()].into_iter().collect();
        let c = compute(&q, &degraded, NOW, &params(2), None);

        assert_eq!(c.price, Some(Price::new(dec!(100))));
        assert_eq!(c.contributors, vec![VenueId::new("a").unwrap()]);
    }

    #[test]
    fn test_anchor_breaks_even_median_tie() {
        // Without an anchor the midpoint (115) makes both quotes outliers.
        let q = quotes(&[("a", dec!(100), 0), ("b", dec!(130), 0)]);
        let c = compute(&q, &HashSet::new(), NOW, &params(2), None);
        assert_eq!(c.price, None);
        assert_eq!(c.outliers.len(), 2);

        // Anchored on the previous consensus the median is 100 and b drops.
        let c = compute(&q, &HashSet::new(), NOW, &params(2), Some(Price::new(dec!(100.05))));
        assert_eq!(c.price, Some(Price::new(dec!(100))));
        assert_eq!(c.outliers, vec![VenueId::new("b").unwrap()]);
        assert_eq!(c.level, ConfidenceLevel::Low);
    }

    #[test]
    fn test_anchored_median() {
        assert_eq!(anchored_median(&[], None), None);
        assert_eq!(anchored_median(&[dec!(1), dec!(2), dec!(9)], Some(dec!(9))), Some(dec!(2)));
        assert_eq!(anchored_median(&[dec!(1), dec!(3)], None), Some(dec!(2)));
        assert_eq!(anchored_median(&[dec!(1), dec!(3)], Some(dec!(2.9))), Some(dec!(3)));
        assert_eq!(anchored_median(&[dec!(1), dec!(3)], Some(dec!(2))), Some(dec!(2)));
    }

    #[test]
    fn test_threshold_boundary_is_inclusive() {
        assert!(!is_outlier(dec!(101.5), dec!(100), dec!(1.5)));
        assert!(is_outlier(dec!(101.51), dec!(100), dec!(1.5)));
        assert!(is_outlier(dec!(98.49), dec!(100), dec!(1.5)));
    }
}
