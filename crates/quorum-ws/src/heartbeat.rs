//! Heartbeat management for WebSocket sessions.
//!
//! Venues go quiet for long stretches on illiquid symbols, so liveness is
//! probed with protocol pings only after a period without any frame.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug)]
struct HeartbeatState {
    last_ping: Option<Instant>,
    last_pong: Option<Instant>,
    last_message: Instant,
    waiting_for_pong: bool,
}

/// Heartbeat manager for one session.
#[derive(Debug)]
pub struct HeartbeatManager {
    /// Idle time before a ping is sent.
    interval: Duration,
    /// How long to wait for the pong.
    timeout: Duration,
    state: Mutex<HeartbeatState>,
}

impl HeartbeatManager {
    pub fn new(interval_ms: u64, timeout_ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms),
            timeout: Duration::from_millis(timeout_ms),
            state: Mutex::new(HeartbeatState {
                last_ping: None,
                last_pong: None,
                last_message: Instant::now(),
                waiting_for_pong: false,
            }),
        }
    }

    /// Reset heartbeat state (called on connection).
    pub fn reset(&self) {
        let mut s = self.state.lock();
        s.last_ping = None;
        s.last_pong = None;
        s.last_message = Instant::now();
        s.waiting_for_pong = false;
    }

    pub fn record_ping(&self) {
        let mut s = self.state.lock();
        s.last_ping = Some(Instant::now());
        s.waiting_for_pong = true;
    }

    pub fn record_pong(&self) {
        let now = Instant::now();
        let mut s = self.state.lock();
        s.last_pong = Some(now);
        s.waiting_for_pong = false;
        if let Some(ping) = s.last_ping {
            debug!(rtt_ms = now.duration_since(ping).as_millis() as u64, "Received pong");
        }
    }

    /// Any inbound frame counts as proof of life.
    pub fn record_message(&self) {
        let mut s = self.state.lock();
        s.last_message = Instant::now();
        s.waiting_for_pong = false;
    }

    pub fn is_timed_out(&self) -> bool {
        let s = self.state.lock();
        match (s.waiting_for_pong, s.last_ping) {
            (true, Some(ping)) => ping.elapsed() > self.timeout,
            _ => false,
        }
    }

    pub fn should_send_heartbeat(&self) -> bool {
        let s = self.state.lock();
        !s.waiting_for_pong && s.last_message.elapsed() >= self.interval
    }

    /// Wait for the next heartbeat check.
    pub async fn wait_for_check(&self) {
        tokio::time::sleep(self.interval / 2).await;
    }

    pub fn stats(&self) -> HeartbeatStats {
        let s = self.state.lock();
        HeartbeatStats {
            waiting_for_pong: s.waiting_for_pong,
            ms_since_last_message: s.last_message.elapsed().as_millis() as u64,
            ms_since_last_pong: s.last_pong.map(|p| p.elapsed().as_millis() as u64),
        }
    }
}

/// Heartbeat statistics.
#[derive(Debug, Clone)]
pub struct HeartbeatStats {
    pub waiting_for_pong: bool,
    pub ms_since_last_message: u64,
    pub ms_since_last_pong: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_initial_state() {
        let hb = HeartbeatManager::new(20000, 5000);
        assert!(!hb.is_timed_out());
        assert!(!hb.should_send_heartbeat());
        assert!(!hb.stats().waiting_for_pong);
    }

    #[test]
    fn test_heartbeat_ping_pong() {
        let hb = HeartbeatManager::new(20000, 5000);

        hb.record_ping();
        assert!(hb.stats().waiting_for_pong);

        hb.record_pong();
        assert!(!hb.stats().waiting_for_pong);
        assert!(hb.stats().ms_since_last_pong.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_timeout_after_silence() {
        let hb = HeartbeatManager::new(1000, 500);

        tokio::time::advance(Duration::from_millis(1000)).await;
        assert!(hb.should_send_heartbeat());

        hb.record_ping();
        assert!(!hb.should_send_heartbeat());
        tokio::time::advance(Duration::from_millis(501)).await;
        assert!(hb.is_timed_out());

        hb.record_message();
        assert!(!hb.is_timed_out());
    }
}
