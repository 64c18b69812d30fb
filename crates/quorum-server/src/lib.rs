//! quorum-server - REST and streaming API for consensus prices.
//!
//! - `Publisher`: fixed-cadence batched snapshots to streaming subscribers
//! - REST: `GET /prices`, `GET /prices/{symbol}`, `GET /prices/{symbol}/twap`,
//!   `POST /route`, `GET /health`, `GET /metrics`
//! - Streaming: `GET /ws` (initial snapshot, then one update per cycle)
//!
//! # Usage
//!
//! ```ignore
//! use quorum_server::{run_server, Publisher, ServerConfig, ServerState};
//!
//! let publisher = Arc::new(Publisher::new(aggregator.clone(), &publisher_config));
//! tokio::spawn(publisher.clone().run(publisher_config.update_interval_ms, cancel.clone()));
//!
//! let state = ServerState::new(aggregator, router, health, publisher);
//! run_server(state, ServerConfig::default(), cancel).await?;
//! ```

mod config;
mod error;
mod publisher;
mod server;
mod state;
mod types;

pub use config::{PublisherConfig, ServerConfig};
pub use error::{ServerError, ServerResult};
pub use publisher::{PublishReport, PublishedFrame, Publisher, Subscription};
pub use server::{bind, create_router, run_server, serve, ConnectionGuard, ConnectionLimiter};
pub use state::ServerState;
pub use types::{
    ApiError, ClientMessage, HealthResponse, HealthStatus, PriceMap, PriceView, PricesResponse,
    RouteRequest, SourceView, StreamMessage, TwapResponse,
};
