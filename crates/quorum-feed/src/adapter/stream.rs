//! Streaming (WebSocket) venues.

use super::{PriceSource, QuoteSink, RawQuote, SymbolMap};
use crate::error::{FeedError, FeedResult};
use crate::parser;
use async_trait::async_trait;
use quorum_core::{Symbol, VenueId};
use quorum_ws::{SessionConfig, SessionEnd, WsSession};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Venue wire protocols supported over WebSocket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamVenue {
    Binance,
    Coinbase,
    Kraken,
}

impl StreamVenue {
    pub fn default_url(&self) -> &'static str {
        match self {
            Self::Binance => "wss://stream.binance.com:9443/ws",
            Self::Coinbase => "wss://ws-feed.exchange.coinbase.com",
            Self::Kraken => "wss://ws.kraken.com",
        }
    }

    /// Venue market name for a symbol when no override is configured.
    pub fn default_market(&self, symbol: &Symbol) -> String {
        match self {
            Self::Binance => format!("{}usdt", symbol.as_str().to_ascii_lowercase()),
            Self::Coinbase => format!("{}-USD", symbol),
            Self::Kraken if symbol.as_str() == "BTC" => "XBT/USD".to_string(),
            Self::Kraken => format!("{}/USD", symbol),
        }
    }

    /// Connection URL. Binance selects streams in the path.
    pub fn session_url(&self, base: &str, markets: &[String]) -> String {
        match self {
            Self::Binance => {
                let streams: Vec<String> = markets.iter().map(|m| format!("{m}@trade")).collect();
                format!("{}/{}", base.trim_end_matches('/'), streams.join("/"))
            }
            Self::Coinbase | Self::Kraken => base.to_string(),
        }
    }

    /// Frames to send once connected.
    pub fn subscribe_frames(&self, markets: &[String]) -> Vec<String> {
        match self {
            Self::Binance => Vec::new(),
            Self::Coinbase => vec![json!({
                "type": "subscribe",
                "product_ids": markets,
                "channels": ["matches"],
            })
            .to_string()],
            Self::Kraken => vec![json!({
                "event": "subscribe",
                "pair": markets,
                "subscription": { "name": "trade" },
            })
            .to_string()],
        }
    }

    pub fn parse(&self, text: &str, symbols: &SymbolMap) -> FeedResult<Vec<RawQuote>> {
        match self {
            Self::Binance => parser::parse_binance(text, symbols),
            Self::Coinbase => parser::parse_coinbase(text, symbols),
            Self::Kraken => parser::parse_kraken(text, symbols),
        }
    }
}

/// A WebSocket-backed price source.
pub struct WsPriceSource {
    venue: VenueId,
    protocol: StreamVenue,
    base_url: String,
    symbols: SymbolMap,
    session_template: SessionConfig,
}

impl WsPriceSource {
    pub fn new(
        venue: VenueId,
        protocol: StreamVenue,
        base_url: Option<String>,
        symbols: SymbolMap,
    ) -> Self {
        Self {
            venue,
            protocol,
            base_url: base_url.unwrap_or_else(|| protocol.default_url().to_string()),
            symbols,
            session_template: SessionConfig::default(),
        }
    }

    /// Override heartbeat and connect timeouts.
    pub fn with_session_config(mut self, template: SessionConfig) -> Self {
        self.session_template = template;
        self
    }

    fn session_config(&self, symbols: &[Symbol]) -> FeedResult<SessionConfig> {
        let markets = self.symbols.venue_names(symbols);
        if markets.is_empty() {
            return match symbols.first() {
                Some(s) => Err(FeedError::UnmappedSymbol(s.clone())),
                None => Err(FeedError::InvalidData("no symbols to subscribe".to_string())),
            };
        }
        Ok(SessionConfig {
            url: self.protocol.session_url(&self.base_url, &markets),
            subscribe_frames: self.protocol.subscribe_frames(&markets),
            ..self.session_template.clone()
        })
    }
}

#[async_trait]
impl PriceSource for WsPriceSource {
    fn venue(&self) -> &VenueId {
        &self.venue
    }

    async fn run_session(
        &self,
        symbols: &[Symbol],
        sink: &QuoteSink,
        cancel: &CancellationToken,
    ) -> FeedResult<()> {
        let session = WsSession::new(self.session_config(symbols)?);
        let (frames_tx, mut frames_rx) = mpsc::channel::<String>(1024);

        let run = session.run(&frames_tx, cancel);
        tokio::pin!(run);

        loop {
            tokio::select! {
                end = &mut run => {
                    // Deliver whatever was read before the connection ended.
                    while let Ok(text) = frames_rx.try_recv() {
                        self.handle_frame(&text, sink).await?;
                    }
                    return match end? {
                        SessionEnd::Cancelled => Ok(()),
                        SessionEnd::StreamEnded => {
                            info!(venue = %self.venue, "Venue closed the stream");
                            Ok(())
                        }
                    };
                }
                Some(text) = frames_rx.recv() => {
                    self.handle_frame(&text, sink).await?;
                }
            }
        }
    }
}

impl WsPriceSource {
    async fn handle_frame(&self, text: &str, sink: &QuoteSink) -> FeedResult<()> {
        match self.protocol.parse(text, &self.symbols) {
            Ok(quotes) => {
                for quote in quotes {
                    sink.emit(quote).await?;
                }
                Ok(())
            }
            // Venue-reported errors end the session; malformed frames don't.
            Err(e @ FeedError::InvalidData(_)) => Err(e),
            Err(e) => {
                sink.parse_error(&e);
                debug!(venue = %self.venue, frame = %text, "Unparseable frame");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn symbols() -> Vec<Symbol> {
        vec![Symbol::new("BTC").unwrap(), Symbol::new("ETH").unwrap()]
    }

    #[test]
    fn test_default_markets() {
        let btc = Symbol::new("BTC").unwrap();
        assert_eq!(StreamVenue::Binance.default_market(&btc), "btcusdt");
        assert_eq!(StreamVenue::Coinbase.default_market(&btc), "BTC-USD");
        assert_eq!(StreamVenue::Kraken.default_market(&btc), "XBT/USD");
        assert_eq!(
            StreamVenue::Kraken.default_market(&Symbol::new("SOL").unwrap()),
            "SOL/USD"
        );
    }

    #[test]
    fn test_binance_url_carries_streams() {
        let markets = vec!["btcusdt".to_string(), "ethusdt".to_string()];
        assert_eq!(
            StreamVenue::Binance.session_url("wss://example/ws/", &markets),
            "wss://example/ws/btcusdt@trade/ethusdt@trade"
        );
        assert!(StreamVenue::Binance.subscribe_frames(&markets).is_empty());
    }

    #[test]
    fn test_subscribe_frames() {
        let markets = vec!["XBT/USD".to_string()];
        let frames = StreamVenue::Kraken.subscribe_frames(&markets);
        let v: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(v["event"], "subscribe");
        assert_eq!(v["pair"][0], "XBT/USD");
        assert_eq!(v["subscription"]["name"], "trade");

        let frames = StreamVenue::Coinbase.subscribe_frames(&["BTC-USD".to_string()]);
        let v: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(v["channels"][0], "matches");
    }

    #[test]
    fn test_session_config_requires_mapped_symbols() {
        let venue = VenueId::new("kraken").unwrap();
        let map = SymbolMap::build(&symbols(), &HashMap::new(), |s| {
            StreamVenue::Kraken.default_market(s)
        });
        let source = WsPriceSource::new(venue.clone(), StreamVenue::Kraken, None, map);
        let config = source.session_config(&symbols()).unwrap();
        assert_eq!(config.url, "wss://ws.kraken.com");
        assert_eq!(config.subscribe_frames.len(), 1);

        let empty = WsPriceSource::new(venue, StreamVenue::Kraken, None, SymbolMap::new());
        assert!(matches!(
            empty.session_config(&symbols()),
            Err(FeedError::UnmappedSymbol(_))
        ));
    }
}
