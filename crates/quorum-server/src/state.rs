//! Shared state for API handlers.

use std::sync::Arc;

use quorum_core::{now_ms, Symbol};
use quorum_feed::{Aggregator, VenueHealthRegistry};
use quorum_router::Router;

use crate::publisher::Publisher;
use crate::types::{HealthResponse, HealthStatus, PriceView, PricesResponse};

/// Everything the handlers read. Cheap to clone.
#[derive(Clone)]
pub struct ServerState {
    pub aggregator: Arc<Aggregator>,
    pub router: Arc<Router>,
    pub health: Arc<VenueHealthRegistry>,
    pub publisher: Arc<Publisher>,
}

impl ServerState {
    pub fn new(
        aggregator: Arc<Aggregator>,
        router: Arc<Router>,
        health: Arc<VenueHealthRegistry>,
        publisher: Arc<Publisher>,
    ) -> Self {
        Self {
            aggregator,
            router,
            health,
            publisher,
        }
    }

    fn window(&self) -> u64 {
        self.aggregator.config().staleness_window_ms
    }

    pub fn prices(&self) -> PricesResponse {
        let now = now_ms();
        let window = self.window();
        let prices = self
            .aggregator
            .snapshot_all_at(now)
            .iter()
            .map(|s| (s.symbol.clone(), PriceView::from_state(s, now, window)))
            .collect();
        PricesResponse {
            timestamp: now,
            prices,
        }
    }

    pub fn price(&self, symbol: &Symbol) -> Option<PriceView> {
        let now = now_ms();
        self.aggregator
            .snapshot_at(symbol, now)
            .map(|s| PriceView::from_state(&s, now, self.window()))
    }

    pub fn health_report(&self) -> HealthResponse {
        let status = if self.health.any_degraded() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Ok
        };
        HealthResponse {
            status,
            venues: self.health.summary(),
            ingest: self.aggregator.stats(),
            subscribers: self.publisher.subscriber_count(),
            publish_cycle: self.publisher.cycle(),
        }
    }
}
