//! Mock streaming venue for integration tests.
//!
//! Accepts WebSocket connections on a local port and forwards every
//! pushed frame to all connected clients. Frames pushed while nobody is
//! connected are lost, so tests push repeatedly until they observe the
//! effect they are waiting for.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message};

pub struct MockVenue {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    frames: broadcast::Sender<String>,
    connections: Arc<AtomicU32>,
}

impl MockVenue {
    /// Start a mock venue on an available port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (frames, _) = broadcast::channel::<String>(256);
        let connections = Arc::new(AtomicU32::new(0));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let frames_clone = frames.clone();
        let connections_clone = connections.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        let rx = frames_clone.subscribe();
                        tokio::spawn(handle_connection(stream, rx, connections_clone.clone()));
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            frames,
            connections,
        }
    }

    /// Base URL in the shape the Binance adapter expects.
    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn connection_count(&self) -> u32 {
        self.connections.load(Ordering::SeqCst)
    }

    /// Send a raw frame to every connected client.
    pub fn push(&self, frame: impl Into<String>) {
        let _ = self.frames.send(frame.into());
    }

    /// Send a Binance-style trade for `market`.
    pub fn push_trade(&self, market: &str, price: &str) {
        let frame = serde_json::json!({
            "e": "trade",
            "s": market.to_ascii_uppercase(),
            "p": price,
            "T": quorum_core::now_ms(),
        });
        self.push(frame.to_string());
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    mut frames: broadcast::Receiver<String>,
    connections: Arc<AtomicU32>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {e}");
            return;
        }
    };
    connections.fetch_add(1, Ordering::SeqCst);

    let (mut write, mut read) = ws_stream.split();
    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Ok(text) => {
                    if write.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
            msg = read.next() => match msg {
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                _ => {}
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_venue_starts() {
        let venue = MockVenue::start().await;
        assert!(venue.url().starts_with("ws://127.0.0.1:"));
        assert_eq!(venue.connection_count(), 0);
        venue.shutdown().await;
    }
}
