//! Price feed ingestion and consensus aggregation.
//!
//! Venue adapters stream or poll prices into a channel of `FeedEvent`s;
//! the `Aggregator` folds accepted ticks into a per-symbol consensus.

pub mod adapter;
pub mod aggregator;
pub mod consensus;
pub mod error;
pub mod event;
pub mod health;
pub mod history;
pub mod parser;

pub use adapter::{
    AdapterConfig, AdapterHandle, CoinGeckoSource, PriceSource, QuoteSink, RawQuote,
    RestPollConfig, StreamVenue, SymbolMap, WsPriceSource,
};
pub use aggregator::{Aggregator, AggregatorConfig, IngestStats};
pub use error::{FeedError, FeedResult, IngestionRejected};
pub use event::{AdapterStatus, FeedEvent, StatusEvent};
pub use health::{VenueHealth, VenueHealthRegistry};
pub use history::PriceHistory;
