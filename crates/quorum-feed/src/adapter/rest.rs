//! Polling (REST) venues.

use super::{PriceSource, QuoteSink, SymbolMap};
use crate::error::{FeedError, FeedResult};
use crate::parser;
use async_trait::async_trait;
use quorum_core::{Symbol, VenueId};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// CoinGecko polling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestPollConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_base_url() -> String {
    "https://api.coingecko.com/api/v3".to_string()
}
fn default_poll_interval_ms() -> u64 {
    30000
}
fn default_timeout_ms() -> u64 {
    10000
}

impl Default for RestPollConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            poll_interval_ms: default_poll_interval_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Default CoinGecko coin id for a canonical symbol.
pub fn coingecko_id(symbol: &Symbol) -> String {
    match symbol.as_str() {
        "BTC" => "bitcoin".to_string(),
        "ETH" => "ethereum".to_string(),
        "SOL" => "solana".to_string(),
        "USDC" => "usd-coin".to_string(),
        "USDT" => "tether".to_string(),
        other => other.to_ascii_lowercase(),
    }
}

/// Polls CoinGecko `simple/price`.
///
/// A session is a polling loop; it ends with an error on the first failed
/// request so the supervisor can back off.
pub struct CoinGeckoSource {
    venue: VenueId,
    client: Client,
    config: RestPollConfig,
    symbols: SymbolMap,
}

impl CoinGeckoSource {
    pub fn new(venue: VenueId, config: RestPollConfig, symbols: SymbolMap) -> FeedResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            venue,
            client,
            config,
            symbols,
        })
    }

    pub fn price_url(&self, symbols: &[Symbol]) -> FeedResult<String> {
        let ids = self.symbols.venue_names(symbols);
        if ids.is_empty() {
            return Err(FeedError::InvalidData("no symbols to poll".to_string()));
        }
        Ok(format!(
            "{}/simple/price?ids={}&vs_currencies=usd&include_last_updated_at=true",
            self.config.base_url.trim_end_matches('/'),
            ids.join(",")
        ))
    }

    async fn poll_once(&self, url: &str, sink: &QuoteSink) -> FeedResult<usize> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::HttpStatus(status.as_u16()));
        }
        let body = response.text().await?;

        let quotes = match parser::parse_coingecko(&body, &self.symbols) {
            Ok(quotes) => quotes,
            Err(e) => {
                sink.parse_error(&e);
                return Err(e);
            }
        };
        let count = quotes.len();
        for quote in quotes {
            sink.emit(quote).await?;
        }
        Ok(count)
    }
}

#[async_trait]
impl PriceSource for CoinGeckoSource {
    fn venue(&self) -> &VenueId {
        &self.venue
    }

    async fn run_session(
        &self,
        symbols: &[Symbol],
        sink: &QuoteSink,
        cancel: &CancellationToken,
    ) -> FeedResult<()> {
        let url = self.price_url(symbols)?;
        let interval = Duration::from_millis(self.config.poll_interval_ms.max(1));
        debug!(venue = %self.venue, %url, "Polling session started");

        loop {
            let count = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                result = self.poll_once(&url, sink) => result?,
            };
            trace!(venue = %self.venue, count, "Poll complete");

            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                () = tokio::time::sleep(interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_price_url() {
        let symbols = vec![Symbol::new("BTC").unwrap(), Symbol::new("ETH").unwrap()];
        let map = SymbolMap::build(&symbols, &HashMap::new(), coingecko_id);
        let source = CoinGeckoSource::new(
            VenueId::new("coingecko").unwrap(),
            RestPollConfig {
                base_url: "http://localhost:9999/api/v3/".to_string(),
                ..Default::default()
            },
            map,
        )
        .unwrap();

        assert_eq!(
            source.price_url(&symbols).unwrap(),
            "http://localhost:9999/api/v3/simple/price?ids=bitcoin,ethereum&vs_currencies=usd&include_last_updated_at=true"
        );
        assert!(source.price_url(&[Symbol::new("DOGE").unwrap()]).is_err());
    }

    #[test]
    fn test_default_ids() {
        assert_eq!(coingecko_id(&Symbol::new("SOL").unwrap()), "solana");
        assert_eq!(coingecko_id(&Symbol::new("ARB").unwrap()), "arb");
    }
}
