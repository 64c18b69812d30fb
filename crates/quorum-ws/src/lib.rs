//! WebSocket plumbing for streaming venue adapters.
//!
//! Provides:
//! - `WsSession`: one connection lifetime (connect, subscribe, read loop)
//! - `HeartbeatManager`: ping/pong liveness tracking
//! - `BackoffPolicy`: exponential reconnect delays with jitter
//!
//! Reconnecting is the caller's job; a session returns as soon as the
//! connection ends so the caller can count the failure and back off.

pub mod backoff;
pub mod connection;
pub mod error;
pub mod heartbeat;

pub use backoff::BackoffPolicy;
pub use connection::{ConnectionState, SessionConfig, SessionEnd, WsSession};
pub use error::{WsError, WsResult};
pub use heartbeat::{HeartbeatManager, HeartbeatStats};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any WebSocket connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
