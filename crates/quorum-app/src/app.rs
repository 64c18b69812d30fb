//! Main application orchestration.
//!
//! Coordinates all components:
//! - Source adapters (one supervised task per venue)
//! - Ingest loop (adapter events -> aggregator and venue health)
//! - Publisher (fixed-cadence streaming snapshots)
//! - Commit sink (periodic durable writes)
//! - API server
//!
//! Adapters never touch shared state; they only send events to the ingest
//! loop. On shutdown the adapters stop first, then the ingest loop drains,
//! then the publisher, the commit sink and the server are cancelled.

use crate::config::{AppConfig, VenueConfig};
use crate::error::{AppError, AppResult};
use quorum_core::Symbol;
use quorum_feed::adapter::rest::coingecko_id;
use quorum_feed::{
    AdapterHandle, AdapterStatus, Aggregator, CoinGeckoSource, FeedEvent, PriceSource, SymbolMap,
    VenueHealthRegistry, WsPriceSource,
};
use quorum_persistence::{build_store, CommitSink};
use quorum_router::Router;
use quorum_server::{bind, serve, Publisher, ServerState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Main application.
pub struct Application {
    config: AppConfig,
    aggregator: Arc<Aggregator>,
    health: Arc<VenueHealthRegistry>,
    router: Arc<Router>,
    publisher: Arc<Publisher>,
}

impl Application {
    /// Create a new application. Validates the configuration and builds
    /// the shared state; nothing is started yet.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;

        let symbols = config.symbol_list()?;
        let aggregator = Arc::new(Aggregator::with_symbols(
            config.aggregator_config(),
            symbols,
        ));

        let health = Arc::new(VenueHealthRegistry::new());
        for venue in config.enabled_venues() {
            health.register(venue.venue_id()?);
        }

        let fees = Arc::new(config.fee_table()?);
        for venue in config.enabled_venues() {
            let id = venue.venue_id()?;
            if !fees.contains(&id) {
                warn!(venue = %id, "No fee entry; venue feeds consensus but is never routed to");
            }
        }

        let router = Arc::new(Router::new(
            aggregator.clone(),
            fees,
            health.clone(),
            config.router.clone(),
        ));
        let publisher = Arc::new(Publisher::new(aggregator.clone(), &config.publisher));

        Ok(Self {
            config,
            aggregator,
            health,
            router,
            publisher,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    /// Start every component and return a handle to the running service.
    pub async fn start(self) -> AppResult<RunningApp> {
        let symbols = self.config.symbol_list()?;
        info!(
            symbols = ?symbols.iter().map(Symbol::as_str).collect::<Vec<_>>(),
            venues = self.config.enabled_venues().count(),
            "Starting application"
        );

        // Bind before starting anything so a bad address fails fast
        let listener = bind(&self.config.server).await?;
        let local_addr = listener.local_addr()?;

        let store = build_store(&self.config.commit)?;
        let sink = Arc::new(CommitSink::new(
            self.aggregator.clone(),
            store,
            &self.config.commit,
        ));

        let (events_tx, events_rx) = mpsc::channel(self.config.adapter.event_buffer.max(1));
        let mut adapters = Vec::new();
        for venue in self.config.enabled_venues() {
            let source = build_source(&self.config, venue, &symbols)?;
            info!(venue = %venue.id, kind = ?venue.kind, "Starting adapter");
            adapters.push(AdapterHandle::start(
                source,
                symbols.clone(),
                events_tx.clone(),
                &self.config.adapter,
            ));
        }
        // Adapters own the only senders; the loop ends once they all stop
        drop(events_tx);

        let ingest = tokio::spawn(ingest_loop(
            events_rx,
            self.aggregator.clone(),
            self.health.clone(),
        ));

        let cancel = CancellationToken::new();
        let publisher_task = tokio::spawn(self.publisher.clone().run(
            self.config.publisher.update_interval_ms,
            cancel.clone(),
        ));
        let commit_task = tokio::spawn(sink.run(cancel.clone()));

        let state = ServerState::new(
            self.aggregator.clone(),
            self.router.clone(),
            self.health.clone(),
            self.publisher.clone(),
        );
        let server_config = self.config.server.clone();
        let server_cancel = cancel.clone();
        let server = tokio::spawn(async move {
            let result = serve(listener, state, &server_config, server_cancel.clone()).await;
            if let Err(e) = &result {
                error!(error = %e, "API server failed");
                server_cancel.cancel();
            }
            result
        });

        info!(%local_addr, "Application started");
        Ok(RunningApp {
            aggregator: self.aggregator,
            health: self.health,
            router: self.router,
            publisher: self.publisher,
            local_addr,
            adapters,
            ingest,
            cancel,
            services: vec![publisher_task, commit_task],
            server,
        })
    }

    /// Run until Ctrl+C (or until the API server fails), then shut down.
    pub async fn run(self) -> AppResult<()> {
        let app = self.start().await?;
        let stopped = app.cancel.clone();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
            }
            () = stopped.cancelled() => {
                warn!("Service stopped unexpectedly");
            }
        }
        app.shutdown().await
    }
}

/// Handle to a started service.
pub struct RunningApp {
    aggregator: Arc<Aggregator>,
    health: Arc<VenueHealthRegistry>,
    router: Arc<Router>,
    publisher: Arc<Publisher>,
    local_addr: SocketAddr,
    adapters: Vec<AdapterHandle>,
    ingest: JoinHandle<u64>,
    cancel: CancellationToken,
    services: Vec<JoinHandle<()>>,
    server: JoinHandle<quorum_server::ServerResult<()>>,
}

impl RunningApp {
    /// Address the API server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    pub fn health(&self) -> &Arc<VenueHealthRegistry> {
        &self.health
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn publisher(&self) -> &Arc<Publisher> {
        &self.publisher
    }

    /// Stop adapters, drain pending events, then stop the rest.
    pub async fn shutdown(self) -> AppResult<()> {
        info!(adapters = self.adapters.len(), "Shutting down");
        for adapter in self.adapters {
            adapter.stop().await;
        }

        match self.ingest.await {
            Ok(events) => info!(events, "Ingest loop drained"),
            Err(e) => warn!(error = %e, "Ingest loop ended abnormally"),
        }

        self.cancel.cancel();
        for task in self.services {
            if let Err(e) = task.await {
                warn!(error = %e, "Service task ended abnormally");
            }
        }

        let result = match self.server.await {
            Ok(result) => result.map_err(AppError::from),
            Err(e) => {
                warn!(error = %e, "API server task ended abnormally");
                Ok(())
            }
        };

        let stats = self.aggregator.stats();
        info!(?stats, cycle = self.publisher.cycle(), "Shutdown complete");
        result
    }
}

/// Build the price source for one configured venue.
fn build_source(
    config: &AppConfig,
    venue: &VenueConfig,
    symbols: &[Symbol],
) -> AppResult<Arc<dyn PriceSource>> {
    let id = venue.venue_id()?;
    let source: Arc<dyn PriceSource> = match venue.kind.stream() {
        Some(protocol) => {
            let map = SymbolMap::build(symbols, &venue.symbols, |s| protocol.default_market(s));
            Arc::new(
                WsPriceSource::new(id, protocol, venue.url.clone(), map)
                    .with_session_config(config.ws.session_template()),
            )
        }
        None => {
            let map = SymbolMap::build(symbols, &venue.symbols, coingecko_id);
            Arc::new(CoinGeckoSource::new(id, venue.rest_config(), map)?)
        }
    };
    Ok(source)
}

/// Apply adapter events to shared state. Returns the number of events seen.
async fn ingest_loop(
    mut events: mpsc::Receiver<FeedEvent>,
    aggregator: Arc<Aggregator>,
    health: Arc<VenueHealthRegistry>,
) -> u64 {
    let mut count = 0u64;
    while let Some(event) = events.recv().await {
        count += 1;
        apply_event(&aggregator, &health, event);
    }
    debug!(count, "Event channel closed");
    count
}

fn apply_event(aggregator: &Aggregator, health: &VenueHealthRegistry, event: FeedEvent) {
    match event {
        FeedEvent::Tick(tick) => {
            if aggregator.ingest(&tick).is_ok() {
                health.record_tick(&tick.venue, tick.timestamp);
            }
        }
        FeedEvent::Status(status) => {
            if let Some(previous) = health.apply(&status) {
                debug!(
                    venue = %status.venue,
                    %previous,
                    next = %status.status,
                    "Venue status changed"
                );
            }
            let degraded = status.status == AdapterStatus::Degraded;
            aggregator.set_venue_degraded(&status.venue, degraded);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_core::{now_ms, Price, Tick, VenueId};
    use quorum_feed::StatusEvent;
    use quorum_persistence::CommitBackend;
    use rust_decimal_macros::dec;

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.server.bind = "127.0.0.1".to_string();
        config.server.port = 0;
        config.commit.backend = CommitBackend::Log;
        // Unroutable endpoints keep the adapters in their backoff loops
        for venue in &mut config.venues {
            venue.url = Some("ws://127.0.0.1:1".to_string());
        }
        config
    }

    fn tick(venue: &str, price: rust_decimal::Decimal, seq: u64) -> Tick {
        Tick {
            symbol: Symbol::new("BTC").unwrap(),
            venue: VenueId::new(venue).unwrap(),
            price: Price::new(price),
            timestamp: now_ms(),
            sequence_id: seq,
        }
    }

    fn status(venue: &str, status: AdapterStatus) -> StatusEvent {
        StatusEvent {
            venue: VenueId::new(venue).unwrap(),
            status,
            consecutive_failures: 3,
            total_failures: 3,
            total_sessions: 3,
            detail: None,
            at_ms: now_ms(),
        }
    }

    #[test]
    fn test_new_registers_enabled_venues() {
        let app = Application::new(test_config()).unwrap();
        assert_eq!(app.aggregator().config().configured_venues, 3);
        assert_eq!(app.health.summary().len(), 3);
        assert_eq!(app.router.fees().len(), 3);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = test_config();
        config.symbols.clear();
        assert!(Application::new(config).is_err());
    }

    #[test]
    fn test_apply_tick_and_degraded_status() {
        let app = Application::new(test_config()).unwrap();
        let (agg, health) = (app.aggregator.clone(), app.health.clone());

        apply_event(&agg, &health, FeedEvent::Tick(tick("binance", dec!(100), 1)));
        apply_event(&agg, &health, FeedEvent::Tick(tick("kraken", dec!(101), 1)));
        let state = agg.snapshot(&Symbol::new("BTC").unwrap()).unwrap();
        assert_eq!(state.contributors.len(), 2);

        apply_event(
            &agg,
            &health,
            FeedEvent::Status(status("kraken", AdapterStatus::Degraded)),
        );
        assert!(agg.is_degraded(&VenueId::new("kraken").unwrap()));
        assert!(health.any_degraded());
        let state = agg.snapshot(&Symbol::new("BTC").unwrap()).unwrap();
        assert_eq!(state.contributors.len(), 1);

        apply_event(
            &agg,
            &health,
            FeedEvent::Status(status("kraken", AdapterStatus::Healthy)),
        );
        assert!(!agg.is_degraded(&VenueId::new("kraken").unwrap()));
    }

    #[test]
    fn test_rejected_tick_not_counted_as_activity() {
        let app = Application::new(test_config()).unwrap();
        let (agg, health) = (app.aggregator.clone(), app.health.clone());

        apply_event(&agg, &health, FeedEvent::Tick(tick("binance", dec!(-5), 1)));
        assert_eq!(agg.stats().rejected_invalid_price, 1);
        let state = agg.snapshot(&Symbol::new("BTC").unwrap());
        assert!(state.map_or(true, |s| s.contributors.is_empty()));
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let app = Application::new(test_config()).unwrap();
        let running = app.start().await.unwrap();
        assert_ne!(running.local_addr().port(), 0);
        running.shutdown().await.unwrap();
    }
}
