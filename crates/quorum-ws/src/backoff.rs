//! Exponential reconnect backoff.

use std::time::Duration;

/// Reconnect delay policy: `base * 2^(attempt-1)`, capped, plus jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Upper bound of the random jitter as a percentage of the delay.
    pub jitter_pct: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            jitter_pct: 10,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based), without jitter.
    ///
    /// attempt=1 -> base, attempt=2 -> 2*base, attempt=3 -> 4*base, ...
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// Delay before retry number `attempt`, with jitter applied.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let span = base.as_millis() as u64 * self.jitter_pct / 100;
        if span == 0 {
            return base;
        }
        base + Duration::from_millis(rand_jitter() % (span + 1))
    }
}

/// Cheap jitter source from the clock's sub-second nanos.
fn rand_jitter() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_growth_and_cap() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.base_delay(1), Duration::from_millis(1000));
        assert_eq!(policy.base_delay(2), Duration::from_millis(2000));
        assert_eq!(policy.base_delay(3), Duration::from_millis(4000));
        assert_eq!(policy.base_delay(5), Duration::from_millis(16000));
        assert_eq!(policy.base_delay(6), Duration::from_millis(30000));
        assert_eq!(policy.base_delay(60), Duration::from_millis(30000));
    }

    #[test]
    fn test_attempt_zero_is_base() {
        let policy = BackoffPolicy::new(500, 4000);
        assert_eq!(policy.base_delay(0), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = BackoffPolicy::default();
        for attempt in 1..8 {
            let base = policy.base_delay(attempt);
            let delay = policy.delay(attempt);
            assert!(delay >= base);
            assert!(delay <= base + base / 10);
        }
    }

    #[test]
    fn test_zero_jitter() {
        let policy = BackoffPolicy {
            jitter_pct: 0,
            ..BackoffPolicy::new(100, 1000)
        };
        assert_eq!(policy.delay(2), Duration::from_millis(200));
    }
}
