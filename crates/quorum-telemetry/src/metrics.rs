//! Prometheus metrics for the aggregator.
//!
//! Covers:
//! - Tick ingestion (accepted / rejected by reason)
//! - Adapter health (failures, parse errors, degraded flag)
//! - Consensus quality (confidence, outliers)
//! - Publisher cycles and subscriber lifecycle
//! - Commit sink outcomes
//! - Router request outcomes
//!
//! # Panics
//!
//! Registration panics on a duplicate metric name. This can only happen
//! during static initialization.

use crate::error::TelemetryResult;
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram, register_int_counter,
    register_int_gauge, CounterVec, Encoder, GaugeVec, Histogram, IntCounter, IntGauge,
    TextEncoder,
};

/// Ticks accepted into consensus state.
pub static TICKS_ACCEPTED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "quorum_ticks_accepted_total",
        "Total ticks accepted by the aggregator",
        &["venue"]
    )
    .unwrap()
});

/// Ticks rejected at ingestion.
/// Labels: reason (invalid_price/out_of_order)
pub static TICKS_REJECTED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "quorum_ticks_rejected_total",
        "Total ticks rejected by the aggregator",
        &["venue", "reason"]
    )
    .unwrap()
});

/// Venue frames that could not be parsed into prices.
pub static ADAPTER_PARSE_ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "quorum_adapter_parse_errors_total",
        "Total venue messages that failed to parse",
        &["venue"]
    )
    .unwrap()
});

/// Adapter sessions that ended without delivering a price.
pub static ADAPTER_FAILURES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "quorum_adapter_failures_total",
        "Total failed adapter sessions",
        &["venue"]
    )
    .unwrap()
});

/// Adapter degraded flag (1 = degraded).
pub static ADAPTER_DEGRADED: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "quorum_adapter_degraded",
        "Adapter degraded state (1=degraded)",
        &["venue"]
    )
    .unwrap()
});

/// Consensus confidence per symbol (0.0-1.0).
pub static CONSENSUS_CONFIDENCE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "quorum_consensus_confidence",
        "Share of configured venues contributing to consensus",
        &["symbol"]
    )
    .unwrap()
});

/// Venue quotes discarded by the outlier filter.
pub static CONSENSUS_OUTLIERS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "quorum_consensus_outliers_total",
        "Total venue quotes excluded as outliers",
        &["symbol", "venue"]
    )
    .unwrap()
});

pub static PUBLISH_CYCLES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("quorum_publish_cycles_total", "Total publish cycles").unwrap()
});

/// Time spent snapshotting and fanning out one cycle.
pub static PUBLISH_DURATION_MS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "quorum_publish_duration_ms",
        "Publish cycle duration in milliseconds",
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 25.0, 50.0]
    )
    .unwrap()
});

pub static SUBSCRIBERS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("quorum_subscribers", "Connected stream subscribers").unwrap()
});

/// Subscribers removed by the publisher.
/// Labels: reason (backlog/closed)
pub static SUBSCRIBERS_DROPPED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "quorum_subscribers_dropped_total",
        "Total subscribers removed by the publisher",
        &["reason"]
    )
    .unwrap()
});

/// Commit outcomes.
/// Labels: result (written/skipped/failed)
pub static COMMITS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "quorum_commits_total",
        "Total commit sink decisions",
        &["result"]
    )
    .unwrap()
});

/// Route requests.
/// Labels: result (ok/no_liquidity/invalid)
pub static ROUTE_REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "quorum_route_requests_total",
        "Total routing requests",
        &["result"]
    )
    .unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    pub fn tick_accepted(venue: &str) {
        TICKS_ACCEPTED_TOTAL.with_label_values(&[venue]).inc();
    }

    pub fn tick_rejected(venue: &str, reason: &str) {
        TICKS_REJECTED_TOTAL
            .with_label_values(&[venue, reason])
            .inc();
    }

    pub fn parse_error(venue: &str) {
        ADAPTER_PARSE_ERRORS_TOTAL.with_label_values(&[venue]).inc();
    }

    pub fn adapter_failure(venue: &str) {
        ADAPTER_FAILURES_TOTAL.with_label_values(&[venue]).inc();
    }

    pub fn adapter_degraded(venue: &str, degraded: bool) {
        ADAPTER_DEGRADED
            .with_label_values(&[venue])
            .set(if degraded { 1.0 } else { 0.0 });
    }

    pub fn consensus_confidence(symbol: &str, confidence: f64) {
        CONSENSUS_CONFIDENCE
            .with_label_values(&[symbol])
            .set(confidence);
    }

    pub fn consensus_outlier(symbol: &str, venue: &str) {
        CONSENSUS_OUTLIERS_TOTAL
            .with_label_values(&[symbol, venue])
            .inc();
    }

    pub fn publish_cycle(duration_ms: f64) {
        PUBLISH_CYCLES_TOTAL.inc();
        PUBLISH_DURATION_MS.observe(duration_ms);
    }

    pub fn subscriber_connected() {
        SUBSCRIBERS.inc();
    }

    pub fn subscriber_disconnected() {
        SUBSCRIBERS.dec();
    }

    pub fn subscriber_dropped(reason: &str) {
        SUBSCRIBERS_DROPPED_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn commit(result: &str) {
        COMMITS_TOTAL.with_label_values(&[result]).inc();
    }

    pub fn route_request(result: &str) {
        ROUTE_REQUESTS_TOTAL.with_label_values(&[result]).inc();
    }

    /// Render every registered collector in the Prometheus text format.
    pub fn render() -> TelemetryResult<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}
