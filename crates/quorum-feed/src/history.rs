//! Bounded consensus history and time-weighted averages.

use quorum_core::Price;
use rust_decimal::Decimal;
use std::collections::VecDeque;

/// Ring buffer of `(timestamp_ms, consensus)` samples for one symbol.
///
/// Samples closer together than `resolution_ms` collapse into one bucket
/// holding the latest value, so a busy symbol does not flush the buffer in
/// seconds.
#[derive(Debug, Clone)]
pub struct PriceHistory {
    samples: VecDeque<(i64, Price)>,
    capacity: usize,
    resolution_ms: i64,
}

impl PriceHistory {
    pub fn new(capacity: usize, resolution_ms: u64) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            resolution_ms: resolution_ms as i64,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<(i64, Price)> {
        self.samples.back().copied()
    }

    pub fn record(&mut self, timestamp_ms: i64, price: Price) {
        if let Some(last) = self.samples.back_mut() {
            if timestamp_ms < last.0 {
                return;
            }
            if timestamp_ms - last.0 < self.resolution_ms {
                last.1 = price;
                return;
            }
        }
        self.samples.push_back((timestamp_ms, price));
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    /// Time-weighted average over `[now - period, now]`.
    ///
    /// Each sample holds until the next one, and a sample taken before the
    /// window covers the window's start. Returns `None` unless at least one
    /// sample falls inside the window.
    pub fn twap(&self, period_ms: u64, now_ms: i64) -> Option<Price> {
        let period = i64::try_from(period_ms).unwrap_or(i64::MAX);
        let cutoff = now_ms.saturating_sub(period);
        let mut weighted = Decimal::ZERO;
        let mut total: i64 = 0;
        let mut latest_in_window = None;

        for (i, (ts, price)) in self.samples.iter().enumerate() {
            if *ts > now_ms {
                break;
            }
            if *ts >= cutoff {
                latest_in_window = Some(*price);
            }
            let end = self
                .samples
                .get(i + 1)
                .map(|(next, _)| *next)
                .unwrap_or(now_ms)
                .min(now_ms);
            let start = (*ts).max(cutoff);
            if end > start {
                let w = end - start;
                weighted += price.inner() * Decimal::from(w);
                total += w;
            }
        }

        let latest = latest_in_window?;
        if total == 0 {
            return Some(latest);
        }
        Some(Price::new(weighted / Decimal::from(total)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn p(d: Decimal) -> Price {
        Price::new(d)
    }

    #[test]
    fn test_time_weighted() {
        let mut h = PriceHistory::new(100, 0);
        h.record(0, p(dec!(50000)));
        h.record(1000, p(dec!(51000)));
        h.record(2000, p(dec!(52000)));

        // 50000 for 1000ms, 51000 for 1000ms
        assert_eq!(h.twap(2000, 2000), Some(p(dec!(50500))));
    }

    #[test]
    fn test_sample_before_window_holds() {
        let mut h = PriceHistory::new(100, 0);
        h.record(0, p(dec!(100)));
        h.record(9000, p(dec!(110)));

        // window [5000, 10000]: 100 for 4000ms, 110 for 1000ms
        assert_eq!(h.twap(5000, 10000), Some(p(dec!(102))));
    }

    #[test]
    fn test_empty_and_future_only() {
        let mut h = PriceHistory::new(10, 0);
        assert_eq!(h.twap(1000, 0), None);

        h.record(5000, p(dec!(1)));
        assert_eq!(h.twap(1000, 4000), None);
        assert_eq!(h.twap(1000, 5000), Some(p(dec!(1))));
    }

    #[test]
    fn test_silent_window_is_unavailable() {
        let mut h = PriceHistory::new(10, 0);
        h.record(0, p(dec!(100)));

        assert_eq!(h.twap(60_000, 60_000), Some(p(dec!(100))));
        assert_eq!(h.twap(60_000, 3_600_000), None);
    }

    #[test]
    fn test_oversized_period_covers_everything() {
        let mut h = PriceHistory::new(10, 0);
        let now = 1_700_000_000_500;
        h.record(now - 1000, p(dec!(10)));
        h.record(now - 500, p(dec!(20)));

        assert_eq!(h.twap(1u64 << 63, now), Some(p(dec!(15))));
        assert_eq!(h.twap(u64::MAX, i64::MIN + 1), None);
    }

    #[test]
    fn test_resolution_buckets_and_capacity() {
        let mut h = PriceHistory::new(3, 1000);
        h.record(0, p(dec!(1)));
        h.record(500, p(dec!(2)));
        assert_eq!(h.len(), 1);
        assert_eq!(h.latest(), Some((0, p(dec!(2)))));

        for t in 1..=5 {
            h.record(t * 1000, p(Decimal::from(t)));
        }
        assert_eq!(h.len(), 3);
        assert_eq!(h.latest(), Some((5000, p(dec!(5)))));
    }
}
