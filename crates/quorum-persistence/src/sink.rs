//! Periodic commit of consensus prices.
//!
//! Each cycle commits every symbol whose consensus moved more than
//! `min_delta_bps` since its last successful commit. A failed write leaves
//! the last-committed value alone, so the next cycle retries with whatever
//! the consensus is by then. Nothing is queued.

use crate::config::CommitConfig;
use crate::store::{CommitRecord, CommitStore};
use parking_lot::Mutex;
use quorum_core::{now_ms, Symbol, SymbolState};
use quorum_feed::Aggregator;
use quorum_telemetry::Metrics;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of one commit cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitCycleReport {
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct CommitSink {
    aggregator: Arc<Aggregator>,
    store: Arc<dyn CommitStore>,
    interval_ms: u64,
    min_delta_bps: Decimal,
    last: Mutex<HashMap<Symbol, CommitRecord>>,
}

impl CommitSink {
    pub fn new(
        aggregator: Arc<Aggregator>,
        store: Arc<dyn CommitStore>,
        config: &CommitConfig,
    ) -> Self {
        Self {
            aggregator,
            store,
            interval_ms: config.interval_ms.max(1),
            min_delta_bps: config.min_delta_bps,
            last: Mutex::new(HashMap::new()),
        }
    }

    /// Last successfully committed record for a symbol.
    pub fn last_committed(&self, symbol: &Symbol) -> Option<CommitRecord> {
        self.last.lock().get(symbol).cloned()
    }

    fn should_commit(&self, state: &SymbolState) -> bool {
        let Some(price) = state.consensus_price else {
            return false;
        };
        match self.last.lock().get(&state.symbol) {
            None => true,
            Some(last) => price
                .bps_from(last.price)
                .map_or(true, |bps| bps.abs() > self.min_delta_bps),
        }
    }

    pub async fn run_cycle(&self) -> CommitCycleReport {
        self.run_cycle_at(now_ms()).await
    }

    /// Run one cycle against the aggregator state at `now_ms`.
    pub async fn run_cycle_at(&self, now_ms: i64) -> CommitCycleReport {
        let mut report = CommitCycleReport::default();

        for state in self.aggregator.snapshot_all_at(now_ms) {
            if !self.should_commit(&state) {
                report.skipped += 1;
                continue;
            }
            let Some(price) = state.consensus_price else {
                continue;
            };
            let record = CommitRecord {
                symbol: state.symbol.clone(),
                price,
                confidence: state.confidence,
                committed_at: now_ms,
            };

            match self.store.commit(&record).await {
                Ok(()) => {
                    Metrics::commit("ok");
                    debug!(symbol = %record.symbol, price = %record.price, "Committed");
                    self.last.lock().insert(record.symbol.clone(), record);
                    report.written += 1;
                }
                Err(e) => {
                    Metrics::commit("error");
                    warn!(symbol = %record.symbol, error = %e, "Commit failed, retrying next cycle");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Commit every interval until cancelled, then run one final cycle.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            interval_ms = self.interval_ms,
            min_delta_bps = %self.min_delta_bps,
            "Commit sink started"
        );
        let mut ticker = tokio::time::interval(Duration::from_millis(self.interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; skip it so commits lag by one interval.
        ticker.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.run_cycle().await;
                    if report.written > 0 || report.failed > 0 {
                        debug!(?report, "Commit cycle");
                    }
                }
            }
        }

        let report = self.run_cycle().await;
        if let Err(e) = self.store.flush().await {
            warn!(error = %e, "Failed to flush commit store");
        }
        info!(?report, "Commit sink stopped after final cycle");
    }
}
