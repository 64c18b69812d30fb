//! Durable commit of consensus prices.
//!
//! A `CommitSink` periodically writes the latest consensus per symbol to
//! a `CommitStore`, skipping values that moved less than a threshold.
//! Committed values intentionally lag the live feed.

pub mod config;
pub mod error;
pub mod sink;
pub mod store;

pub use config::{CommitBackend, CommitConfig};
pub use error::{PersistenceError, PersistenceResult};
pub use sink::{CommitCycleReport, CommitSink};
pub use store::{build_store, CommitRecord, CommitStore, JsonLinesCommitStore, LogCommitStore};
