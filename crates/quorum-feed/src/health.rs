//! Per-venue adapter health, fed by status events.
//!
//! Read by the health endpoint and by the router's tie-break on
//! historical failure rate.

use crate::event::{AdapterStatus, StatusEvent};
use parking_lot::Mutex;
use quorum_core::VenueId;
use serde::Serialize;
use std::collections::BTreeMap;

/// Health view of one venue.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VenueHealth {
    pub venue: VenueId,
    pub status: AdapterStatus,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub total_sessions: u64,
    pub last_tick_at: Option<i64>,
    pub last_error: Option<String>,
    pub failure_rate: f64,
}

impl VenueHealth {
    fn new(venue: VenueId) -> Self {
        Self {
            venue,
            status: AdapterStatus::Starting,
            consecutive_failures: 0,
            total_failures: 0,
            total_sessions: 0,
            last_tick_at: None,
            last_error: None,
            failure_rate: 0.0,
        }
    }
}

/// Registry of venue health.
#[derive(Debug, Default)]
pub struct VenueHealthRegistry {
    venues: Mutex<BTreeMap<VenueId, VenueHealth>>,
}

impl VenueHealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-register venues so they show up before their first event.
    pub fn register(&self, venue: VenueId) {
        self.venues
            .lock()
            .entry(venue.clone())
            .or_insert_with(|| VenueHealth::new(venue));
    }

    /// Apply a status event. Returns the previous status.
    pub fn apply(&self, event: &StatusEvent) -> Option<AdapterStatus> {
        let mut venues = self.venues.lock();
        let health = venues
            .entry(event.venue.clone())
            .or_insert_with(|| VenueHealth::new(event.venue.clone()));
        let previous = health.status;

        health.status = event.status;
        health.consecutive_failures = event.consecutive_failures;
        health.total_failures = event.total_failures;
        health.total_sessions = event.total_sessions;
        if event.detail.is_some() {
            health.last_error = event.detail.clone();
        }
        health.failure_rate = if event.total_sessions == 0 {
            0.0
        } else {
            event.total_failures as f64 / event.total_sessions as f64
        };

        (previous != event.status).then_some(previous)
    }

    pub fn record_tick(&self, venue: &VenueId, at_ms: i64) {
        if let Some(h) = self.venues.lock().get_mut(venue) {
            h.last_tick_at = Some(at_ms);
        }
    }

    /// Historical failure rate. Unknown venues count as never failing.
    pub fn failure_rate(&self, venue: &VenueId) -> f64 {
        self.venues
            .lock()
            .get(venue)
            .map(|h| h.failure_rate)
            .unwrap_or(0.0)
    }

    pub fn is_degraded(&self, venue: &VenueId) -> bool {
        self.venues
            .lock()
            .get(venue)
            .is_some_and(|h| h.status == AdapterStatus::Degraded)
    }

    pub fn any_degraded(&self) -> bool {
        self.venues
            .lock()
            .values()
            .any(|h| h.status == AdapterStatus::Degraded)
    }

    /// All venues, sorted by id.
    pub fn summary(&self) -> Vec<VenueHealth> {
        self.venues.lock().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(status: AdapterStatus, failures: u64, sessions: u64) -> StatusEvent {
        StatusEvent {
            venue: VenueId::new("kraken").unwrap(),
            status,
            consecutive_failures: failures as u32,
            total_failures: failures,
            total_sessions: sessions,
            detail: Some("connection refused".to_string()),
            at_ms: 0,
        }
    }

    #[test]
    fn test_apply_tracks_transitions() {
        let registry = VenueHealthRegistry::new();
        let venue = VenueId::new("kraken").unwrap();
        registry.register(venue.clone());

        assert_eq!(
            registry.apply(&event(AdapterStatus::Degraded, 3, 4)),
            Some(AdapterStatus::Starting)
        );
        assert!(registry.is_degraded(&venue));
        assert!(registry.any_degraded());
        assert!((registry.failure_rate(&venue) - 0.75).abs() < 1e-9);

        // Same status again is not a transition
        assert_eq!(registry.apply(&event(AdapterStatus::Degraded, 4, 5)), None);
    }

    #[test]
    fn test_unknown_venue_defaults() {
        let registry = VenueHealthRegistry::new();
        let venue = VenueId::new("nowhere").unwrap();
        assert_eq!(registry.failure_rate(&venue), 0.0);
        assert!(!registry.is_degraded(&venue));

        registry.record_tick(&venue, 10);
        assert!(registry.summary().is_empty());
    }
}
