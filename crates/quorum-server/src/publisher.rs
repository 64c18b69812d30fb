//! Periodic batched publishing to streaming subscribers.
//!
//! The publisher runs on its own timer, independent of ingestion. Every
//! cycle snapshots all symbols once and offers the same frame to every
//! subscriber without waiting. A subscriber whose queue is full is dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use quorum_core::now_ms;
use quorum_feed::Aggregator;
use quorum_telemetry::Metrics;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::PublisherConfig;
use crate::types::{PriceMap, PriceView};

/// One publish cycle's worth of prices, shared by all subscribers.
#[derive(Debug, Clone)]
pub struct PublishedFrame {
    pub cycle: u64,
    pub timestamp: i64,
    pub prices: PriceMap,
}

/// Outcome of one publish cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub cycle: u64,
    pub delivered: usize,
    pub dropped: usize,
}

/// A registered subscriber.
pub struct Subscription {
    pub id: u64,
    /// Current state at registration time.
    pub initial: Arc<PublishedFrame>,
    pub frames: mpsc::Receiver<Arc<PublishedFrame>>,
}

pub struct Publisher {
    aggregator: Arc<Aggregator>,
    backlog: usize,
    cycle: AtomicU64,
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, mpsc::Sender<Arc<PublishedFrame>>>>,
}

impl Publisher {
    pub fn new(aggregator: Arc<Aggregator>, config: &PublisherConfig) -> Self {
        Self {
            aggregator,
            backlog: config.subscriber_backlog.max(1),
            cycle: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Last completed publish cycle.
    pub fn cycle(&self) -> u64 {
        self.cycle.load(Ordering::Acquire)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Build a frame for `cycle` from the aggregator state at `now_ms`.
    pub fn frame_at(&self, cycle: u64, now_ms: i64) -> PublishedFrame {
        let window = self.aggregator.config().staleness_window_ms;
        let prices = self
            .aggregator
            .snapshot_all_at(now_ms)
            .iter()
            .map(|s| (s.symbol.clone(), PriceView::from_state(s, now_ms, window)))
            .collect();
        PublishedFrame {
            cycle,
            timestamp: now_ms,
            prices,
        }
    }

    /// Register a subscriber. The initial frame carries the current cycle,
    /// so the subscriber never sees the cycle number go backwards.
    ///
    /// The snapshot is built before taking the subscriber lock, so a
    /// connecting client never holds up a publish cycle.
    pub fn subscribe(&self) -> Subscription {
        let initial = self.frame_at(self.cycle(), now_ms());
        self.register(initial)
    }

    fn register(&self, mut initial: PublishedFrame) -> Subscription {
        let (tx, rx) = mpsc::channel(self.backlog);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut subscribers = self.subscribers.lock();
        // Cycles advance under this lock; a cycle that completed while the
        // snapshot was built is folded into the initial frame.
        initial.cycle = initial.cycle.max(self.cycle());
        subscribers.insert(id, tx);
        drop(subscribers);

        let initial = Arc::new(initial);
        Metrics::subscriber_connected();
        debug!(id, cycle = initial.cycle, "Subscriber registered");
        Subscription {
            id,
            initial,
            frames: rx,
        }
    }

    pub fn unsubscribe(&self, id: u64) {
        if self.subscribers.lock().remove(&id).is_some() {
            Metrics::subscriber_disconnected();
            debug!(id, "Subscriber removed");
        }
    }

    pub fn publish_cycle(&self) -> PublishReport {
        self.publish_cycle_at(now_ms())
    }

    /// Run one publish cycle against the state at `now_ms`.
    pub fn publish_cycle_at(&self, now_ms: i64) -> PublishReport {
        let started = Instant::now();
        let mut subscribers = self.subscribers.lock();

        let cycle = self.cycle.load(Ordering::Acquire) + 1;
        let frame = Arc::new(self.frame_at(cycle, now_ms));
        self.cycle.store(cycle, Ordering::Release);

        let mut report = PublishReport {
            cycle,
            ..PublishReport::default()
        };
        subscribers.retain(|id, tx| match tx.try_send(frame.clone()) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(id, cycle, "Subscriber backlog full, dropping subscriber");
                Metrics::subscriber_dropped("backlog_full");
                Metrics::subscriber_disconnected();
                report.dropped += 1;
                false
            }
            Err(TrySendError::Closed(_)) => {
                Metrics::subscriber_disconnected();
                false
            }
        });
        drop(subscribers);

        Metrics::publish_cycle(started.elapsed().as_secs_f64() * 1000.0);
        trace!(?report, "Publish cycle");
        report
    }

    /// Publish every `interval_ms` until cancelled. Missed ticks are skipped.
    pub async fn run(self: Arc<Self>, interval_ms: u64, cancel: CancellationToken) {
        info!(interval_ms, backlog = self.backlog, "Publisher started");
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.publish_cycle();
                }
            }
        }

        // Closing every queue ends the streaming connections.
        let count = {
            let mut subscribers = self.subscribers.lock();
            let count = subscribers.len();
            subscribers.clear();
            count
        };
        for _ in 0..count {
            Metrics::subscriber_disconnected();
        }
        info!(cycle = self.cycle(), "Publisher stopped");
    }
}
