//! Application configuration.
//!
//! Layers, lowest precedence first: built-in defaults, a TOML file, then
//! `QUORUM_*` environment variables. Nested keys use `__` as the separator
//! (`QUORUM_PUBLISHER__UPDATE_INTERVAL_MS=250`); `QUORUM_SYMBOLS` takes a
//! comma-separated list.

use crate::error::{AppError, AppResult};
use ::config::{Config, Environment, File, FileFormat};
use quorum_core::{Symbol, VenueId};
use quorum_feed::{AdapterConfig, AggregatorConfig, RestPollConfig, StreamVenue};
use quorum_persistence::CommitConfig;
use quorum_router::{FeeTable, RouterConfig, VenueFee};
use quorum_server::{PublisherConfig, ServerConfig};
use quorum_ws::SessionConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "QUORUM";

/// Venue protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VenueKind {
    Binance,
    Coinbase,
    Kraken,
    /// REST polling reference source.
    CoinGecko,
}

impl VenueKind {
    /// Streaming protocol, or `None` for polled sources.
    pub fn stream(&self) -> Option<StreamVenue> {
        match self {
            Self::Binance => Some(StreamVenue::Binance),
            Self::Coinbase => Some(StreamVenue::Coinbase),
            Self::Kraken => Some(StreamVenue::Kraken),
            Self::CoinGecko => None,
        }
    }
}

/// One upstream price source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueConfig {
    /// Venue id used in logs, fees and the API.
    pub id: String,
    pub kind: VenueKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Endpoint override (WebSocket base URL or REST API base).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Canonical symbol -> venue market name overrides.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub symbols: HashMap<String, String>,
    /// Poll period for REST sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl VenueConfig {
    fn new(id: &str, kind: VenueKind, enabled: bool) -> Self {
        Self {
            id: id.to_string(),
            kind,
            enabled,
            url: None,
            symbols: HashMap::new(),
            poll_interval_ms: None,
        }
    }

    pub fn venue_id(&self) -> AppResult<VenueId> {
        Ok(VenueId::new(&self.id)?)
    }

    /// Settings for a polled source.
    pub fn rest_config(&self) -> RestPollConfig {
        let mut config = RestPollConfig::default();
        if let Some(url) = &self.url {
            config.base_url = url.clone();
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval_ms = ms;
        }
        config
    }
}

/// WebSocket session timing for streaming venues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_heartbeat_interval_ms() -> u64 {
    20_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    10_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl WsConfig {
    /// Session template; URL and subscriptions are filled in per venue.
    pub fn session_template(&self) -> SessionConfig {
        SessionConfig {
            heartbeat_interval_ms: self.heartbeat_interval_ms,
            heartbeat_timeout_ms: self.heartbeat_timeout_ms,
            connect_timeout_ms: self.connect_timeout_ms,
            ..SessionConfig::default()
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Tracked symbols.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    #[serde(default = "default_venues")]
    pub venues: Vec<VenueConfig>,

    #[serde(default = "default_fees")]
    pub fees: Vec<VenueFee>,

    #[serde(default)]
    pub adapter: AdapterConfig,

    #[serde(default)]
    pub ws: WsConfig,

    #[serde(default)]
    pub aggregator: AggregatorConfig,

    #[serde(default)]
    pub router: RouterConfig,

    #[serde(default)]
    pub publisher: PublisherConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub commit: CommitConfig,
}

fn default_symbols() -> Vec<String> {
    vec!["BTC".to_string(), "ETH".to_string()]
}

fn default_venues() -> Vec<VenueConfig> {
    vec![
        VenueConfig::new("binance", VenueKind::Binance, true),
        VenueConfig::new("coinbase", VenueKind::Coinbase, true),
        VenueConfig::new("kraken", VenueKind::Kraken, true),
        VenueConfig::new("coingecko", VenueKind::CoinGecko, false),
    ]
}

fn fee(venue: &str, maker: Decimal, taker: Decimal) -> Option<VenueFee> {
    VenueId::new(venue)
        .ok()
        .map(|id| VenueFee::new(id, maker, taker))
}

fn default_fees() -> Vec<VenueFee> {
    [
        fee("binance", Decimal::new(10, 0), Decimal::new(10, 0)),
        fee("coinbase", Decimal::new(40, 0), Decimal::new(60, 0)),
        fee("kraken", Decimal::new(16, 0), Decimal::new(26, 0)),
    ]
    .into_iter()
    .flatten()
    .collect()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            venues: default_venues(),
            fees: default_fees(),
            adapter: AdapterConfig::default(),
            ws: WsConfig::default(),
            aggregator: AggregatorConfig::default(),
            router: RouterConfig::default(),
            publisher: PublisherConfig::default(),
            server: ServerConfig::default(),
            commit: CommitConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load `path` (if it exists, or unconditionally when `required`) and
    /// overlay the process environment.
    pub fn load(path: &str, required: bool) -> AppResult<Self> {
        Self::layered(Some((path, required)), None)
    }

    /// Load from a specific TOML file, without environment overrides.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config {path}: {e}")))?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Build from an optional file and an environment. `env = None` reads
    /// the process environment.
    pub fn layered(
        file: Option<(&str, bool)>,
        env: Option<::config::Map<String, String>>,
    ) -> AppResult<Self> {
        let mut builder = Config::builder();
        if let Some((path, required)) = file {
            if required || Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml).required(required));
            } else {
                tracing::warn!(path, "Config file not found, using defaults");
            }
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("symbols")
                .try_parsing(true)
                .source(env),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the service cannot run with.
    pub fn validate(&self) -> AppResult<()> {
        let symbols = self.symbol_list()?;
        if symbols.is_empty() {
            return Err(AppError::Config("no symbols configured".to_string()));
        }

        let mut ids = HashSet::new();
        for venue in &self.venues {
            let id = venue.venue_id()?;
            if !ids.insert(id.clone()) {
                return Err(AppError::Config(format!("duplicate venue {id}")));
            }
        }
        if !self.venues.iter().any(|v| v.enabled) {
            return Err(AppError::Config("no venues enabled".to_string()));
        }

        self.fee_table()?;

        let aggregator = &self.aggregator;
        if aggregator.staleness_window_ms == 0 {
            return Err(AppError::Config(
                "aggregator.staleness_window_ms must be positive".to_string(),
            ));
        }
        if aggregator.outlier_threshold_pct <= Decimal::ZERO {
            return Err(AppError::Config(
                "aggregator.outlier_threshold_pct must be positive".to_string(),
            ));
        }
        if self.router.tie_epsilon.is_sign_negative() {
            return Err(AppError::Config(
                "router.tie_epsilon must not be negative".to_string(),
            ));
        }
        if self.publisher.update_interval_ms == 0 || self.publisher.subscriber_backlog == 0 {
            return Err(AppError::Config(
                "publisher interval and backlog must be positive".to_string(),
            ));
        }
        if self.commit.interval_ms == 0 {
            return Err(AppError::Config(
                "commit.interval_ms must be positive".to_string(),
            ));
        }
        if self.commit.min_delta_bps.is_sign_negative() {
            return Err(AppError::Config(
                "commit.min_delta_bps must not be negative".to_string(),
            ));
        }
        if self.adapter.reconnect_base_delay_ms > self.adapter.reconnect_max_delay_ms {
            return Err(AppError::Config(
                "adapter.reconnect_base_delay_ms exceeds reconnect_max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Parsed symbol list, deduplicated in configured order.
    pub fn symbol_list(&self) -> AppResult<Vec<Symbol>> {
        let mut seen = HashSet::new();
        let mut symbols = Vec::with_capacity(self.symbols.len());
        for raw in &self.symbols {
            let symbol = Symbol::new(raw)?;
            if seen.insert(symbol.clone()) {
                symbols.push(symbol);
            }
        }
        Ok(symbols)
    }

    pub fn enabled_venues(&self) -> impl Iterator<Item = &VenueConfig> {
        self.venues.iter().filter(|v| v.enabled)
    }

    pub fn fee_table(&self) -> AppResult<FeeTable> {
        Ok(FeeTable::new(self.fees.iter().cloned())?)
    }

    /// Aggregator settings with the confidence denominator defaulted to
    /// the number of enabled venues.
    pub fn aggregator_config(&self) -> AggregatorConfig {
        let mut config = self.aggregator.clone();
        if config.configured_venues == 0 {
            config.configured_venues = self.enabled_venues().count();
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> ::config::Map<String, String> {
        let mut map = ::config::Map::new();
        for (k, v) in pairs {
            map.insert(k.to_string(), v.to_string());
        }
        map
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        tokio_test::assert_ok!(config.validate());
        assert_eq!(config.symbol_list().unwrap().len(), 2);
        assert_eq!(config.enabled_venues().count(), 3);
        assert_eq!(config.aggregator_config().configured_venues, 3);
        assert_eq!(config.aggregator.staleness_window_ms, 5000);
        assert_eq!(config.publisher.update_interval_ms, 100);
        assert_eq!(config.commit.interval_ms, 5000);
    }

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("symbols"));
        assert!(toml_str.contains("[[venues]]"));
        assert!(toml_str.contains("staleness_window_ms"));

        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.venues.len(), config.venues.len());
        assert_eq!(parsed.fees, config.fees);
    }

    #[test]
    fn test_empty_environment_gives_defaults() {
        let config = AppConfig::layered(None, Some(env(&[]))).unwrap();
        assert_eq!(config.symbols, vec!["BTC", "ETH"]);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_environment_overrides() {
        let config = AppConfig::layered(
            None,
            Some(env(&[
                ("QUORUM_SYMBOLS", "btc,sol"),
                ("QUORUM_SERVER__PORT", "9090"),
                ("QUORUM_PUBLISHER__UPDATE_INTERVAL_MS", "250"),
                ("QUORUM_COMMIT__MIN_DELTA_BPS", "2.5"),
            ])),
        )
        .unwrap();

        let symbols: Vec<String> = config
            .symbol_list()
            .unwrap()
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(symbols, vec!["BTC", "SOL"]);
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.publisher.update_interval_ms, 250);
        assert_eq!(config.commit.min_delta_bps, dec!(2.5));
    }

    #[test]
    fn test_file_then_environment() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
symbols = ["ETH"]

[[venues]]
id = "binance"
kind = "binance"
url = "ws://127.0.0.1:9000/ws"
symbols = {{ eth = "ethusdt" }}

[[fees]]
venue = "binance"
maker_fee_bps = "2"
taker_fee_bps = "4"

[server]
port = 8181

[aggregator]
outlier_threshold_pct = "2.0"
"#
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let config =
            AppConfig::layered(Some((&path, true)), Some(env(&[("QUORUM_SERVER__PORT", "8282")])))
                .unwrap();

        assert_eq!(config.symbols, vec!["ETH"]);
        assert_eq!(config.venues.len(), 1);
        assert_eq!(config.venues[0].kind, VenueKind::Binance);
        assert_eq!(config.venues[0].symbols.get("eth").map(String::as_str), Some("ethusdt"));
        assert_eq!(config.aggregator.outlier_threshold_pct, dec!(2.0));
        // Environment wins over the file
        assert_eq!(config.server.port, 8282);
        // Untouched sections keep their defaults
        assert_eq!(config.aggregator.staleness_window_ms, 5000);

        let direct = AppConfig::from_file(&path).unwrap();
        assert_eq!(direct.server.port, 8181);
    }

    #[test]
    fn test_missing_required_file_fails() {
        let result = AppConfig::layered(Some(("/nonexistent/quorum.toml", true)), Some(env(&[])));
        tokio_test::assert_err!(result);
    }

    #[test]
    fn test_missing_optional_file_uses_defaults() {
        let config =
            AppConfig::layered(Some(("/nonexistent/quorum.toml", false)), Some(env(&[]))).unwrap();
        assert_eq!(config.venues.len(), 4);
    }

    #[test]
    fn test_validation_failures() {
        let mut config = AppConfig::default();
        config.symbols.clear();
        assert!(matches!(config.validate(), Err(AppError::Config(_))));

        let mut config = AppConfig::default();
        config.venues.push(VenueConfig::new("Binance", VenueKind::Binance, true));
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        for venue in &mut config.venues {
            venue.enabled = false;
        }
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        let duplicate = config.fees[0].clone();
        config.fees.push(duplicate);
        assert!(matches!(config.validate(), Err(AppError::Router(_))));

        let mut config = AppConfig::default();
        config.publisher.subscriber_backlog = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.commit.min_delta_bps = dec!(-1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_shipped_default_file_parses() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../config/default.toml");
        let config = AppConfig::from_file(path).unwrap();
        assert_eq!(config.venues.len(), 4);
        assert_eq!(config.enabled_venues().count(), 3);
        assert_eq!(config.fee_table().unwrap().len(), 3);
        assert_eq!(config.aggregator.outlier_threshold_pct, dec!(1.5));
    }

    #[test]
    fn test_rest_config_overrides() {
        let mut venue = VenueConfig::new("coingecko", VenueKind::CoinGecko, true);
        assert_eq!(venue.rest_config().poll_interval_ms, 30_000);
        venue.url = Some("http://127.0.0.1:1234".to_string());
        venue.poll_interval_ms = Some(500);
        let rest = venue.rest_config();
        assert_eq!(rest.base_url, "http://127.0.0.1:1234");
        assert_eq!(rest.poll_interval_ms, 500);
        assert!(venue.kind.stream().is_none());
    }
}
