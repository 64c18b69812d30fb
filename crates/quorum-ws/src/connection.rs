//! A single WebSocket session.
//!
//! `WsSession::run` connects, sends the venue's subscribe frames, then
//! forwards every text frame to a channel until the connection ends or the
//! cancellation token fires. It never reconnects by itself.

use crate::error::{WsError, WsResult};
use crate::heartbeat::HeartbeatManager;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async_tls_with_config, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket URL.
    pub url: String,
    /// Text frames sent right after the handshake.
    pub subscribe_frames: Vec<String>,
    /// Idle time before a ping is sent.
    pub heartbeat_interval_ms: u64,
    /// Pong must arrive within this.
    pub heartbeat_timeout_ms: u64,
    /// Upper bound on TCP + TLS + upgrade.
    pub connect_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            subscribe_frames: Vec::new(),
            heartbeat_interval_ms: 20000,
            heartbeat_timeout_ms: 10000,
            connect_timeout_ms: 10000,
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// How a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The cancellation token fired.
    Cancelled,
    /// The server ended the stream without a close frame.
    StreamEnded,
}

/// One WebSocket connection lifetime.
pub struct WsSession {
    config: SessionConfig,
    state: RwLock<ConnectionState>,
    heartbeat: HeartbeatManager,
    frames_received: AtomicU64,
}

impl WsSession {
    pub fn new(config: SessionConfig) -> Self {
        let heartbeat =
            HeartbeatManager::new(config.heartbeat_interval_ms, config.heartbeat_timeout_ms);
        Self {
            config,
            state: RwLock::new(ConnectionState::Disconnected),
            heartbeat,
            frames_received: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Text frames forwarded over the lifetime of this value.
    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Connect and pump frames into `frames_tx` until the connection ends.
    pub async fn run(
        &self,
        frames_tx: &mpsc::Sender<String>,
        cancel: &CancellationToken,
    ) -> WsResult<SessionEnd> {
        let result = self.run_inner(frames_tx, cancel).await;
        *self.state.write() = ConnectionState::Disconnected;
        result
    }

    async fn run_inner(
        &self,
        frames_tx: &mpsc::Sender<String>,
        cancel: &CancellationToken,
    ) -> WsResult<SessionEnd> {
        *self.state.write() = ConnectionState::Connecting;
        info!(url = %self.config.url, "Connecting to WebSocket");

        // TCP_NODELAY: ticks are small and latency-sensitive
        let connect = connect_async_tls_with_config(&self.config.url, None, true, None);
        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let ws_stream = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
            res = tokio::time::timeout(timeout, connect) => match res {
                Ok(Ok((stream, _response))) => stream,
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Err(WsError::ConnectTimeout(self.config.connect_timeout_ms)),
            },
        };
        let (mut write, mut read) = ws_stream.split();

        *self.state.write() = ConnectionState::Connected;
        info!(url = %self.config.url, "WebSocket connected");

        for frame in &self.config.subscribe_frames {
            write.send(Message::Text(frame.clone())).await?;
        }
        debug!(count = self.config.subscribe_frames.len(), "Subscribe frames sent");

        self.heartbeat.reset();

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    if let Err(e) = write.send(Message::Close(None)).await {
                        warn!(?e, "Failed to send Close frame during shutdown");
                    }
                    return Ok(SessionEnd::Cancelled);
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.heartbeat.record_message();
                            self.frames_received.fetch_add(1, Ordering::Relaxed);
                            if frames_tx.send(text).await.is_err() {
                                return Err(WsError::ReceiverDropped);
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            self.heartbeat.record_message();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            self.heartbeat.record_pong();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1000, "Normal close".to_string()));
                            warn!(code, %reason, url = %self.config.url, "WebSocket closed by server");
                            return Err(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Ok(_)) => {
                            self.heartbeat.record_message();
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            warn!(url = %self.config.url, "WebSocket stream ended");
                            return Ok(SessionEnd::StreamEnded);
                        }
                    }
                }

                () = self.heartbeat.wait_for_check() => {
                    if self.heartbeat.is_timed_out() {
                        return Err(WsError::HeartbeatTimeout);
                    }
                    if self.heartbeat.should_send_heartbeat() {
                        write.send(Message::Ping(Vec::new())).await?;
                        self.heartbeat.record_ping();
                        debug!("Sent heartbeat ping");
                    }
                }
            }
        }
    }
}
