//! Consensus price aggregation.
//!
//! Owns every `SymbolState`. Ticks come in through `ingest`; readers only
//! ever get cloned snapshots, recomputed against the time of the read so a
//! venue that went quiet drops out even if no new tick arrives.

use crate::consensus::{self, ConsensusParams};
use crate::error::IngestionRejected;
use crate::history::PriceHistory;
use dashmap::DashMap;
use parking_lot::RwLock;
use quorum_core::{now_ms, Price, Symbol, SymbolState, Tick, VenueId, VenuePrice};
use quorum_telemetry::Metrics;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Aggregator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Maximum age of a venue quote still used for consensus.
    #[serde(default = "default_staleness_window_ms")]
    pub staleness_window_ms: u64,

    /// Distance from the median (percent) beyond which a quote is dropped.
    #[serde(default = "default_outlier_threshold_pct")]
    pub outlier_threshold_pct: Decimal,

    /// Consensus samples kept per symbol for TWAP.
    #[serde(default = "default_history_len")]
    pub history_len: usize,

    /// Minimum spacing between history samples.
    #[serde(default = "default_history_resolution_ms")]
    pub history_resolution_ms: u64,

    /// Venues expected per symbol (confidence denominator). Filled in from
    /// the enabled venue list at startup; 0 = count venues seen.
    #[serde(default)]
    pub configured_venues: usize,
}

fn default_staleness_window_ms() -> u64 {
    5000
}
fn default_outlier_threshold_pct() -> Decimal {
    Decimal::new(15, 1) // 1.5
}
fn default_history_len() -> usize {
    1000
}
fn default_history_resolution_ms() -> u64 {
    1000
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            staleness_window_ms: default_staleness_window_ms(),
            outlier_threshold_pct: default_outlier_threshold_pct(),
            history_len: default_history_len(),
            history_resolution_ms: default_history_resolution_ms(),
            configured_venues: 0,
        }
    }
}

/// Ingestion counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestStats {
    pub accepted: u64,
    pub rejected_invalid_price: u64,
    pub rejected_out_of_order: u64,
}

#[derive(Debug)]
struct SymbolEntry {
    state: SymbolState,
    history: PriceHistory,
    /// Last available consensus; breaks even-count median ties.
    anchor: Option<Price>,
}

type StateEntry = Arc<RwLock<SymbolEntry>>;

/// Aggregated per-symbol state store.
pub struct Aggregator {
    config: AggregatorConfig,
    params: ConsensusParams,
    symbols: DashMap<Symbol, StateEntry>,
    degraded: RwLock<HashSet<VenueId>>,
    accepted: AtomicU64,
    rejected_invalid_price: AtomicU64,
    rejected_out_of_order: AtomicU64,
}

impl Aggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        let params = ConsensusParams {
            staleness_window_ms: config.staleness_window_ms,
            outlier_threshold_pct: config.outlier_threshold_pct,
            configured_venues: config.configured_venues,
        };
        Self {
            config,
            params,
            symbols: DashMap::new(),
            degraded: RwLock::new(HashSet::new()),
            accepted: AtomicU64::new(0),
            rejected_invalid_price: AtomicU64::new(0),
            rejected_out_of_order: AtomicU64::new(0),
        }
    }

    /// Create with symbols pre-registered, so they are listed before any
    /// venue has quoted them.
    pub fn with_symbols(config: AggregatorConfig, symbols: impl IntoIterator<Item = Symbol>) -> Self {
        let aggregator = Self::new(config);
        for symbol in symbols {
            aggregator.get_or_create(&symbol);
        }
        aggregator
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    fn get_or_create(&self, symbol: &Symbol) -> StateEntry {
        if let Some(entry) = self.symbols.get(symbol) {
            return entry.clone();
        }
        self.symbols
            .entry(symbol.clone())
            .or_insert_with(|| {
                Arc::new(RwLock::new(SymbolEntry {
                    state: SymbolState::empty(symbol.clone()),
                    history: PriceHistory::new(
                        self.config.history_len,
                        self.config.history_resolution_ms,
                    ),
                    anchor: None,
                }))
            })
            .clone()
    }

    fn degraded_set(&self) -> HashSet<VenueId> {
        self.degraded.read().clone()
    }

    /// Ingest a tick at the current wall-clock time.
    pub fn ingest(&self, tick: &Tick) -> Result<(), IngestionRejected> {
        self.ingest_at(tick, now_ms())
    }

    /// Ingest a tick received at `now_ms`.
    pub fn ingest_at(&self, tick: &Tick, now_ms: i64) -> Result<(), IngestionRejected> {
        let result = self.try_ingest(tick, now_ms);
        match &result {
            Ok(()) => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
                Metrics::tick_accepted(tick.venue.as_str());
            }
            Err(rejection) => {
                match rejection {
                    IngestionRejected::InvalidPrice { .. } => {
                        self.rejected_invalid_price.fetch_add(1, Ordering::Relaxed)
                    }
                    IngestionRejected::OutOfOrder { .. } => {
                        self.rejected_out_of_order.fetch_add(1, Ordering::Relaxed)
                    }
                };
                Metrics::tick_rejected(tick.venue.as_str(), rejection.reason());
                debug!(%rejection, "Tick rejected");
            }
        }
        result
    }

    fn try_ingest(&self, tick: &Tick, now_ms: i64) -> Result<(), IngestionRejected> {
        if !tick.price.is_positive() {
            return Err(IngestionRejected::InvalidPrice {
                symbol: tick.symbol.clone(),
                venue: tick.venue.clone(),
                price: tick.price.to_string(),
            });
        }

        let degraded = self.degraded_set();
        let entry = self.get_or_create(&tick.symbol);
        let mut guard = entry.write();

        if let Some(existing) = guard.state.per_venue.get(&tick.venue) {
            if tick.sequence_id <= existing.sequence_id {
                return Err(IngestionRejected::OutOfOrder {
                    symbol: tick.symbol.clone(),
                    venue: tick.venue.clone(),
                    sequence_id: tick.sequence_id,
                    last_sequence_id: existing.sequence_id,
                });
            }
        }

        guard.state.per_venue.insert(
            tick.venue.clone(),
            VenuePrice {
                price: tick.price,
                received_at: now_ms,
                source_timestamp: tick.timestamp,
                sequence_id: tick.sequence_id,
            },
        );
        self.recompute(&mut guard, &degraded, now_ms);
        Ok(())
    }

    /// Recompute and store consensus for one entry.
    fn recompute(&self, entry: &mut SymbolEntry, degraded: &HashSet<VenueId>, now_ms: i64) {
        let c = consensus::compute(
            &entry.state.per_venue,
            degraded,
            now_ms,
            &self.params,
            entry.anchor,
        );

        for venue in &c.outliers {
            if !entry.state.outliers.contains(venue) {
                Metrics::consensus_outlier(entry.state.symbol.as_str(), venue.as_str());
                debug!(symbol = %entry.state.symbol, %venue, "Venue quote excluded as outlier");
            }
        }
        if c.price.is_none() && c.outliers.len() > 1 {
            warn!(
                symbol = %entry.state.symbol,
                outliers = c.outliers.len(),
                "Venues disagree beyond threshold, consensus unavailable"
            );
        }

        Self::apply(&mut entry.state, c, now_ms);
        Metrics::consensus_confidence(entry.state.symbol.as_str(), entry.state.confidence);
        if let Some(price) = entry.state.consensus_price {
            entry.anchor = Some(price);
            entry.history.record(now_ms, price);
        }
    }

    fn apply(state: &mut SymbolState, c: consensus::Consensus, now_ms: i64) {
        state.consensus_price = c.price;
        state.consensus_at = c.price.map(|_| now_ms);
        state.confidence = c.confidence;
        state.confidence_level = c.level;
        state.contributors = c.contributors;
        state.outliers = c.outliers;
        state.min = c.min;
        state.max = c.max;
        state.spread_pct = c.spread_pct;
    }

    /// Snapshot one symbol at the current time.
    pub fn snapshot(&self, symbol: &Symbol) -> Option<SymbolState> {
        self.snapshot_at(symbol, now_ms())
    }

    /// Snapshot one symbol as of `now_ms`.
    ///
    /// The stored state is cloned under a read lock and consensus is
    /// recomputed on the copy, so expired venues never leak into the result.
    pub fn snapshot_at(&self, symbol: &Symbol, now_ms: i64) -> Option<SymbolState> {
        let entry = self.symbols.get(symbol)?.clone();
        let (mut state, anchor) = {
            let guard = entry.read();
            (guard.state.clone(), guard.anchor)
        };
        let degraded = self.degraded_set();
        let c = consensus::compute(&state.per_venue, &degraded, now_ms, &self.params, anchor);
        Self::apply(&mut state, c, now_ms);
        Some(state)
    }

    /// Snapshot every tracked symbol, sorted by symbol.
    pub fn snapshot_all(&self) -> Vec<SymbolState> {
        self.snapshot_all_at(now_ms())
    }

    pub fn snapshot_all_at(&self, now_ms: i64) -> Vec<SymbolState> {
        let mut out: Vec<SymbolState> = self
            .symbols()
            .iter()
            .filter_map(|s| self.snapshot_at(s, now_ms))
            .collect();
        out.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        out
    }

    /// Tracked symbols.
    pub fn symbols(&self) -> Vec<Symbol> {
        self.symbols.iter().map(|e| e.key().clone()).collect()
    }

    pub fn is_tracked(&self, symbol: &Symbol) -> bool {
        self.symbols.contains_key(symbol)
    }

    /// Mark a venue degraded (excluded from consensus) or healthy again.
    ///
    /// Returns `true` if this changed anything. Stored consensus is
    /// recomputed for every symbol the venue quotes.
    pub fn set_venue_degraded(&self, venue: &VenueId, degraded: bool) -> bool {
        let changed = {
            let mut set = self.degraded.write();
            if degraded {
                set.insert(venue.clone())
            } else {
                set.remove(venue)
            }
        };
        if !changed {
            return false;
        }

        info!(%venue, degraded, "Venue consensus eligibility changed");
        let degraded_now = self.degraded_set();
        let now = now_ms();
        let entries: Vec<StateEntry> = self.symbols.iter().map(|e| e.value().clone()).collect();
        for entry in entries {
            let mut guard = entry.write();
            if guard.state.per_venue.contains_key(venue) {
                self.recompute(&mut guard, &degraded_now, now);
            }
        }
        true
    }

    pub fn is_degraded(&self, venue: &VenueId) -> bool {
        self.degraded.read().contains(venue)
    }

    /// Time-weighted consensus over the trailing `period_ms`.
    pub fn twap(&self, symbol: &Symbol, period_ms: u64) -> Option<Price> {
        self.twap_at(symbol, period_ms, now_ms())
    }

    pub fn twap_at(&self, symbol: &Symbol, period_ms: u64, now_ms: i64) -> Option<Price> {
        let entry = self.symbols.get(symbol)?.clone();
        let guard = entry.read();
        guard.history.twap(period_ms, now_ms)
    }

    pub fn stats(&self) -> IngestStats {
        IngestStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected_invalid_price: self.rejected_invalid_price.load(Ordering::Relaxed),
            rejected_out_of_order: self.rejected_out_of_order.load(Ordering::Relaxed),
        }
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(AggregatorConfig::default())
    }
}
