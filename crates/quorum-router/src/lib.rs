//! Fee-aware venue routing.
//!
//! Given a desired trade, picks the venue with the best fee-adjusted
//! price among those with a fresh quote in the aggregator.

pub mod error;
pub mod fee;
pub mod router;

pub use error::{RouterError, RouterResult};
pub use fee::{FeeTable, VenueFee};
pub use router::{RouteCandidate, RouteDecision, Router, RouterConfig};
