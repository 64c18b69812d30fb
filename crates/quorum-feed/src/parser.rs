//! Venue message parsing.
//!
//! Turns raw venue frames into `RawQuote`s. Control messages
//! (subscription acks, heartbeats) parse to an empty list; only frames
//! that claim to carry a price but cannot be read are errors.
//!
//! Prices are only checked for being numeric here. Zero and negative
//! values pass through so the aggregator can reject and count them.

use crate::adapter::{RawQuote, SymbolMap};
use crate::error::{FeedError, FeedResult};
use chrono::DateTime;
use quorum_core::Price;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

/// Binance trade event (`<symbol>@trade`).
#[derive(Debug, Deserialize)]
pub struct BinanceTrade {
    #[serde(rename = "e")]
    pub event_type: String,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "p")]
    pub price: String,
    /// Trade time (ms).
    #[serde(rename = "T")]
    pub trade_time: Option<i64>,
}

/// Binance combined-stream wrapper.
#[derive(Debug, Deserialize)]
struct BinanceCombined {
    data: Value,
}

/// Coinbase `matches` / `ticker` channel message.
#[derive(Debug, Deserialize)]
pub struct CoinbaseMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
    /// RFC 3339 time.
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// CoinGecko `simple/price` entry.
#[derive(Debug, Deserialize)]
pub struct CoinGeckoPrice {
    pub usd: Option<f64>,
    /// Seconds since epoch.
    #[serde(default)]
    pub last_updated_at: Option<i64>,
}

pub fn parse_price(raw: &str) -> FeedResult<Price> {
    raw.trim()
        .parse::<Price>()
        .map_err(|e| FeedError::ParseError(format!("price {raw:?}: {e}")))
}

/// Parse a Binance trade frame (raw or combined stream).
pub fn parse_binance(text: &str, symbols: &SymbolMap) -> FeedResult<Vec<RawQuote>> {
    let value: Value = serde_json::from_str(text)?;
    let payload = if value.get("data").is_some() {
        serde_json::from_value::<BinanceCombined>(value)?.data
    } else {
        value
    };

    if payload.get("e").and_then(Value::as_str) != Some("trade") {
        return Ok(Vec::new());
    }
    let trade: BinanceTrade = serde_json::from_value(payload)?;
    let Some(symbol) = symbols.symbol(&trade.symbol) else {
        return Ok(Vec::new());
    };

    Ok(vec![RawQuote {
        symbol: symbol.clone(),
        price: parse_price(&trade.price)?,
        timestamp: trade.trade_time,
    }])
}

/// Parse a Coinbase Exchange feed message.
pub fn parse_coinbase(text: &str, symbols: &SymbolMap) -> FeedResult<Vec<RawQuote>> {
    let msg: CoinbaseMessage = serde_json::from_str(text)?;
    match msg.kind.as_str() {
        "match" | "last_match" | "ticker" => {}
        "error" => {
            return Err(FeedError::InvalidData(format!(
                "coinbase error: {} {}",
                msg.message.unwrap_or_default(),
                msg.reason.unwrap_or_default()
            )))
        }
        _ => return Ok(Vec::new()),
    }

    let (Some(product), Some(price)) = (msg.product_id.as_deref(), msg.price.as_deref()) else {
        return Err(FeedError::ParseError(format!(
            "coinbase {} without product_id/price",
            msg.kind
        )));
    };
    let Some(symbol) = symbols.symbol(product) else {
        return Ok(Vec::new());
    };

    let timestamp = msg
        .time
        .as_deref()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.timestamp_millis());

    Ok(vec![RawQuote {
        symbol: symbol.clone(),
        price: parse_price(price)?,
        timestamp,
    }])
}

/// Parse a Kraken v1 public feed message.
///
/// Trade frames are arrays: `[channelId, [[price, volume, time, ...], ...],
/// "trade", pair]`. Only the last trade of a batch is kept.
pub fn parse_kraken(text: &str, symbols: &SymbolMap) -> FeedResult<Vec<RawQuote>> {
    let value: Value = serde_json::from_str(text)?;

    if let Some(obj) = value.as_object() {
        let is_error = obj.get("event").and_then(Value::as_str) == Some("subscriptionStatus")
            && obj.get("status").and_then(Value::as_str) == Some("error");
        if is_error {
            let reason = obj
                .get("errorMessage")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            return Err(FeedError::InvalidData(format!("kraken subscription: {reason}")));
        }
        return Ok(Vec::new());
    }

    let Some(frame) = value.as_array() else {
        return Ok(Vec::new());
    };
    if frame.len() < 4 || frame.get(2).and_then(Value::as_str) != Some("trade") {
        return Ok(Vec::new());
    }

    let pair = frame[3]
        .as_str()
        .ok_or_else(|| FeedError::ParseError("kraken trade without pair".to_string()))?;
    let Some(symbol) = symbols.symbol(pair) else {
        return Ok(Vec::new());
    };
    let Some(last) = frame[1].as_array().and_then(|trades| trades.last()) else {
        return Ok(Vec::new());
    };

    let price = last
        .get(0)
        .and_then(Value::as_str)
        .ok_or_else(|| FeedError::ParseError("kraken trade without price".to_string()))?;
    let timestamp = last
        .get(2)
        .and_then(Value::as_str)
        .and_then(|t| t.parse::<f64>().ok())
        .map(|secs| (secs * 1000.0) as i64);

    Ok(vec![RawQuote {
        symbol: symbol.clone(),
        price: parse_price(price)?,
        timestamp,
    }])
}

/// Parse a CoinGecko `simple/price?vs_currencies=usd` response body.
pub fn parse_coingecko(text: &str, symbols: &SymbolMap) -> FeedResult<Vec<RawQuote>> {
    let body: HashMap<String, CoinGeckoPrice> = serde_json::from_str(text)?;
    let mut quotes = Vec::with_capacity(body.len());

    for (id, entry) in body {
        let Some(symbol) = symbols.symbol(&id) else {
            continue;
        };
        let Some(usd) = entry.usd else {
            continue;
        };
        let price = Price::from_f64(usd)
            .ok_or_else(|| FeedError::ParseError(format!("coingecko {id}: {usd}")))?;
        quotes.push(RawQuote {
            symbol: symbol.clone(),
            price,
            timestamp: entry.last_updated_at.map(|s| s * 1000),
        });
    }
    quotes.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    Ok(quotes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_core::Symbol;
    use rust_decimal_macros::dec;

    fn map(pairs: &[(&str, &str)]) -> SymbolMap {
        let mut m = SymbolMap::new();
        for (sym, name) in pairs {
            m.insert(Symbol::new(sym).unwrap(), name.to_string());
        }
        m
    }

    #[test]
    fn test_binance_raw_and_combined() {
        let m = map(&[("BTC", "btcusdt")]);
        let raw = r#"{"e":"trade","E":1700000000001,"s":"BTCUSDT","t":1,"p":"64250.10","q":"0.01","T":1700000000000}"#;
        let quotes = parse_binance(raw, &m).unwrap();
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].price.inner(), dec!(64250.10));
        assert_eq!(quotes[0].timestamp, Some(1_700_000_000_000));

        let combined = format!(r#"{{"stream":"btcusdt@trade","data":{raw}}}"#);
        assert_eq!(parse_binance(&combined, &m).unwrap(), quotes);

        // subscription ack
        assert!(parse_binance(r#"{"result":null,"id":1}"#, &m).unwrap().is_empty());
        // unmapped market
        let other = raw.replace("BTCUSDT", "DOGEUSDT");
        assert!(parse_binance(&other, &m).unwrap().is_empty());
    }

    #[test]
    fn test_binance_bad_price() {
        let m = map(&[("BTC", "btcusdt")]);
        let raw = r#"{"e":"trade","s":"BTCUSDT","p":"NaN","T":1}"#;
        assert!(matches!(parse_binance(raw, &m), Err(FeedError::ParseError(_))));
    }

    #[test]
    fn test_negative_price_passes_through() {
        let m = map(&[("BTC", "btcusdt")]);
        let raw = r#"{"e":"trade","s":"BTCUSDT","p":"-5","T":1}"#;
        let quotes = parse_binance(raw, &m).unwrap();
        assert!(!quotes[0].price.is_positive());
    }

    #[test]
    fn test_coinbase_match() {
        let m = map(&[("ETH", "ETH-USD")]);
        let msg = r#"{"type":"match","trade_id":1,"product_id":"ETH-USD","size":"0.5","price":"3201.55","side":"buy","time":"2024-01-01T00:00:00.250Z"}"#;
        let quotes = parse_coinbase(msg, &m).unwrap();
        assert_eq!(quotes[0].symbol.as_str(), "ETH");
        assert_eq!(quotes[0].price.inner(), dec!(3201.55));
        assert_eq!(quotes[0].timestamp, Some(1_704_067_200_250));

        assert!(parse_coinbase(r#"{"type":"subscriptions","channels":[]}"#, &m)
            .unwrap()
            .is_empty());
        tokio_test::assert_err!(parse_coinbase(
            r#"{"type":"error","message":"Failed","reason":"bad product"}"#,
            &m
        ));
    }

    #[test]
    fn test_kraken_trade_frame() {
        let m = map(&[("BTC", "XBT/USD")]);
        let frame = r#"[337,[["64000.1","0.1","1700000000.123456","b","m",""],["64001.2","0.2","1700000001.500000","s","l",""]],"trade","XBT/USD"]"#;
        let quotes = parse_kraken(frame, &m).unwrap();
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].price.inner(), dec!(64001.2));
        assert_eq!(quotes[0].timestamp, Some(1_700_000_001_500));

        assert!(parse_kraken(r#"{"event":"heartbeat"}"#, &m).unwrap().is_empty());
        assert!(parse_kraken(
            r#"{"event":"subscriptionStatus","status":"error","errorMessage":"Currency pair not supported"}"#,
            &m
        )
        .is_err());
    }

    #[test]
    fn test_coingecko_body() {
        let m = map(&[("BTC", "bitcoin"), ("ETH", "ethereum")]);
        let body = r#"{"bitcoin":{"usd":64000.5,"last_updated_at":1700000000},"ethereum":{"usd":3200},"solana":{"usd":150}}"#;
        let quotes = parse_coingecko(body, &m).unwrap();
        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes[0].symbol.as_str(), "BTC");
        assert_eq!(quotes[0].timestamp, Some(1_700_000_000_000));
        assert_eq!(quotes[1].timestamp, None);
    }
}
