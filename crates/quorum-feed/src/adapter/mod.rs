//! Source adapters.
//!
//! A `PriceSource` knows how to run one session against a venue (one
//! WebSocket connection, or one run of a polling loop). `AdapterHandle`
//! supervises it: it restarts failed sessions with exponential backoff,
//! stamps every price with the adapter's sequence counter, and reports
//! status changes. Adapters only ever send `FeedEvent`s; they never touch
//! aggregator state.

pub mod rest;
pub mod stream;
pub mod symbols;

pub use rest::{CoinGeckoSource, RestPollConfig};
pub use stream::{StreamVenue, WsPriceSource};
pub use symbols::SymbolMap;

use crate::error::{FeedError, FeedResult};
use crate::event::{AdapterStatus, FeedEvent, StatusEvent};
use async_trait::async_trait;
use parking_lot::Mutex;
use quorum_core::{now_ms, Price, Symbol, Tick, VenueId};
use quorum_telemetry::Metrics;
use quorum_ws::BackoffPolicy;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A price parsed from a venue message, before sequencing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawQuote {
    pub symbol: Symbol,
    pub price: Price,
    /// Venue event time (epoch ms), if the venue sends one.
    pub timestamp: Option<i64>,
}

/// One upstream venue.
#[async_trait]
pub trait PriceSource: Send + Sync + 'static {
    fn venue(&self) -> &VenueId;

    /// Run one session, pushing prices into `sink` until the session ends.
    ///
    /// Return `Ok` on a clean end (including cancellation) and `Err` on
    /// failure. Either way the supervisor decides whether to retry.
    async fn run_session(
        &self,
        symbols: &[Symbol],
        sink: &QuoteSink,
        cancel: &CancellationToken,
    ) -> FeedResult<()>;
}

/// Supervisor settings shared by all adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    #[serde(default = "default_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,

    /// Consecutive failed sessions before the adapter reports degraded.
    #[serde(default = "default_degraded_after")]
    pub degraded_after: u32,

    /// Capacity of the adapter -> aggregator event channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    30000
}
fn default_degraded_after() -> u32 {
    3
}
fn default_event_buffer() -> usize {
    4096
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            reconnect_base_delay_ms: default_base_delay_ms(),
            reconnect_max_delay_ms: default_max_delay_ms(),
            degraded_after: default_degraded_after(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl AdapterConfig {
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.reconnect_base_delay_ms, self.reconnect_max_delay_ms)
    }
}

#[derive(Debug)]
struct SupervisorState {
    status: AdapterStatus,
    consecutive_failures: u32,
    total_failures: u64,
    total_sessions: u64,
}

/// Where a session delivers its prices.
///
/// Owns the adapter's sequence counter and status bookkeeping, so a
/// source implementation only deals with parsing.
pub struct QuoteSink {
    venue: VenueId,
    tx: mpsc::Sender<FeedEvent>,
    sequence: AtomicU64,
    session_quotes: AtomicU64,
    state: Mutex<SupervisorState>,
}

impl QuoteSink {
    pub fn new(venue: VenueId, tx: mpsc::Sender<FeedEvent>) -> Self {
        Self {
            venue,
            tx,
            sequence: AtomicU64::new(0),
            session_quotes: AtomicU64::new(0),
            state: Mutex::new(SupervisorState {
                status: AdapterStatus::Starting,
                consecutive_failures: 0,
                total_failures: 0,
                total_sessions: 0,
            }),
        }
    }

    pub fn venue(&self) -> &VenueId {
        &self.venue
    }

    /// Last sequence id handed out.
    pub fn last_sequence(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> AdapterStatus {
        self.state.lock().status
    }

    /// Stamp and emit one price.
    pub async fn emit(&self, quote: RawQuote) -> FeedResult<()> {
        let tick = Tick {
            symbol: quote.symbol,
            venue: self.venue.clone(),
            price: quote.price,
            timestamp: quote.timestamp.unwrap_or_else(now_ms),
            sequence_id: self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
        };
        self.tx
            .send(FeedEvent::Tick(tick))
            .await
            .map_err(|_| FeedError::ChannelClosed)?;

        if self.session_quotes.fetch_add(1, Ordering::Relaxed) == 0 {
            self.mark_session_healthy().await;
        }
        Ok(())
    }

    /// Count a frame that could not be turned into prices.
    pub fn parse_error(&self, err: &FeedError) {
        Metrics::parse_error(self.venue.as_str());
        debug!(venue = %self.venue, %err, "Dropped unparseable venue message");
    }

    /// First price of a session. Always reports, so the registry sees the
    /// session count even when the status does not change.
    async fn mark_session_healthy(&self) {
        let (event, previous) = {
            let mut s = self.state.lock();
            let previous = s.status;
            s.consecutive_failures = 0;
            s.status = AdapterStatus::Healthy;
            (self.status_event(&s, None), previous)
        };
        match previous {
            AdapterStatus::Healthy => {}
            AdapterStatus::Degraded => {
                info!(venue = %self.venue, "Adapter recovered");
                Metrics::adapter_degraded(self.venue.as_str(), false);
            }
            _ => {
                info!(venue = %self.venue, "Adapter healthy");
                Metrics::adapter_degraded(self.venue.as_str(), false);
            }
        }
        let _ = self.tx.send(FeedEvent::Status(event)).await;
    }

    fn begin_session(&self) {
        self.session_quotes.store(0, Ordering::Relaxed);
        self.state.lock().total_sessions += 1;
    }

    /// Close out a session. Returns the consecutive failure count.
    ///
    /// Every failed session is reported, including those that leave the
    /// status unchanged.
    async fn end_session(&self, error: Option<String>, degraded_after: u32) -> u32 {
        let delivered = self.session_quotes.load(Ordering::Relaxed);
        let (event, failures, degraded_now) = {
            let mut s = self.state.lock();
            if delivered > 0 {
                return 0;
            }
            s.consecutive_failures += 1;
            s.total_failures += 1;
            Metrics::adapter_failure(self.venue.as_str());

            let degraded_now =
                s.consecutive_failures >= degraded_after && s.status != AdapterStatus::Degraded;
            if degraded_now {
                s.status = AdapterStatus::Degraded;
            }
            (self.status_event(&s, error), s.consecutive_failures, degraded_now)
        };

        if degraded_now {
            warn!(venue = %self.venue, failures, "Adapter degraded");
            Metrics::adapter_degraded(self.venue.as_str(), true);
        }
        let _ = self.tx.send(FeedEvent::Status(event)).await;
        failures
    }

    fn report(&self, status: AdapterStatus) {
        let event = {
            let mut s = self.state.lock();
            s.status = status;
            self.status_event(&s, None)
        };
        // Stopped may race a consumer that is already gone.
        let _ = self.tx.try_send(FeedEvent::Status(event));
    }

    fn status_event(&self, s: &SupervisorState, detail: Option<String>) -> StatusEvent {
        StatusEvent {
            venue: self.venue.clone(),
            status: s.status,
            consecutive_failures: s.consecutive_failures,
            total_failures: s.total_failures,
            total_sessions: s.total_sessions,
            detail,
            at_ms: now_ms(),
        }
    }
}

/// A running adapter.
pub struct AdapterHandle {
    venue: VenueId,
    sink: Arc<QuoteSink>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl AdapterHandle {
    /// Start streaming or polling `symbols` from `source`.
    pub fn start(
        source: Arc<dyn PriceSource>,
        symbols: Vec<Symbol>,
        events: mpsc::Sender<FeedEvent>,
        config: &AdapterConfig,
    ) -> Self {
        let venue = source.venue().clone();
        let sink = Arc::new(QuoteSink::new(venue.clone(), events));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(supervise(
            source,
            symbols,
            sink.clone(),
            config.backoff(),
            config.degraded_after.max(1),
            cancel.clone(),
        ));
        Self {
            venue,
            sink,
            cancel,
            task,
        }
    }

    pub fn venue(&self) -> &VenueId {
        &self.venue
    }

    pub fn status(&self) -> AdapterStatus {
        self.sink.status()
    }

    pub fn last_sequence(&self) -> u64 {
        self.sink.last_sequence()
    }

    /// Stop the adapter. No tick is emitted after this returns.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(venue = %self.venue, ?e, "Adapter task ended abnormally");
        }
        info!(venue = %self.venue, "Adapter stopped");
    }
}

async fn supervise(
    source: Arc<dyn PriceSource>,
    symbols: Vec<Symbol>,
    sink: Arc<QuoteSink>,
    backoff: BackoffPolicy,
    degraded_after: u32,
    cancel: CancellationToken,
) {
    let venue = source.venue().clone();
    info!(%venue, symbols = symbols.len(), "Adapter starting");
    sink.report(AdapterStatus::Starting);

    loop {
        if cancel.is_cancelled() {
            break;
        }

        sink.begin_session();
        let result = source.run_session(&symbols, &sink, &cancel).await;

        if cancel.is_cancelled() {
            break;
        }

        let error = match result {
            Ok(()) => {
                info!(%venue, "Adapter session ended");
                None
            }
            Err(FeedError::ChannelClosed) => {
                info!(%venue, "Event consumer gone, adapter exiting");
                break;
            }
            Err(e) => {
                warn!(%venue, error = %e, "Adapter session failed");
                Some(e.to_string())
            }
        };

        let failures = sink.end_session(error, degraded_after).await;
        let delay = backoff.delay(failures.max(1));
        debug!(%venue, failures, delay_ms = delay.as_millis() as u64, "Adapter backing off");

        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = cancel.cancelled() => break,
        }
    }

    sink.report(AdapterStatus::Stopped);
}
