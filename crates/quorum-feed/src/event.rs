//! Events emitted by source adapters.

use quorum_core::{Tick, VenueId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Adapter lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterStatus {
    /// Started, no price delivered yet.
    Starting,
    Healthy,
    /// Too many consecutive failed sessions; excluded from consensus.
    Degraded,
    Stopped,
}

impl fmt::Display for AdapterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Status change reported by an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub venue: VenueId,
    pub status: AdapterStatus,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub total_sessions: u64,
    /// Last error, if the change was caused by one.
    pub detail: Option<String>,
    pub at_ms: i64,
}

/// Everything an adapter can say.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Tick(Tick),
    Status(StatusEvent),
}
