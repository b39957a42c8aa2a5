// Message Parser - Binance Futures depth stream and REST depth snapshot
// Combined-stream envelopes are unwrapped; every failure is a ParseError

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

// ============================================================================
// Price/Quantity Level
// ============================================================================

/// A price level [price, quantity]
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct PriceLevel {
    pub price: f64,
    pub quantity: f64,
}

impl PriceLevel {
    pub fn new(price: f64, quantity: f64) -> Self {
        Self { price, quantity }
    }
}

/// Parse a string field as f64, returning ParseError on failure
fn parse_f64_field(value: &str, field_name: &str) -> Result<f64, ParseError> {
    let parsed = value
        .parse::<f64>()
        .map_err(|_| ParseError::InvalidJson(format!("Invalid {}: '{}'", field_name, value)))?;
    if !parsed.is_finite() {
        return Err(ParseError::ValidationFailed(format!(
            "Non-finite {}: '{}'",
            field_name, value
        )));
    }
    Ok(parsed)
}

/// Parse a Binance [price_string, qty_string] pair into PriceLevel
fn parse_level(raw: &[String; 2]) -> Result<PriceLevel, ParseError> {
    let level = PriceLevel {
        price: parse_f64_field(&raw[0], "price")?,
        quantity: parse_f64_field(&raw[1], "quantity")?,
    };
    if level.price <= 0.0 || level.quantity < 0.0 {
        return Err(ParseError::ValidationFailed(format!(
            "Invalid level: price={} qty={}",
            level.price, level.quantity
        )));
    }
    Ok(level)
}

fn parse_levels(raw: &[[String; 2]]) -> Result<Vec<PriceLevel>, ParseError> {
    raw.iter().map(parse_level).collect()
}

// ============================================================================
// Parsed Message Types
// ============================================================================

/// Parsed depth update (order book diff)
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ParsedDepthUpdate {
    pub symbol: String,
    /// `U`
    pub first_update_id: u64,
    /// `u`
    pub final_update_id: u64,
    /// `pu`
    pub prev_final_update_id: Option<u64>,
    pub event_time: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

/// Parsed depth snapshot (full order book)
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ParsedDepthSnapshot {
    pub last_update_id: u64,
    pub event_time: Option<u64>,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

/// Messages this parser understands
#[derive(Debug, Clone)]
pub enum ParsedMessage {
    DepthUpdate(ParsedDepthUpdate),
    DepthSnapshot(ParsedDepthSnapshot),
}

// ============================================================================
// Serde Structures (Raw Binance JSON)
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawDepthUpdate {
    #[serde(rename = "e")]
    _event_type: String,
    #[serde(rename = "E")]
    event_time: u64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "U")]
    first_update_id: u64,
    #[serde(rename = "u")]
    final_update_id: u64,
    #[serde(rename = "pu", default)]
    prev_final_update_id: Option<u64>,
    #[serde(rename = "b")]
    bids: Vec<[String; 2]>,
    #[serde(rename = "a")]
    asks: Vec<[String; 2]>,
}

#[derive(Debug, Deserialize)]
struct RawDepthSnapshot {
    #[serde(rename = "lastUpdateId")]
    last_update_id: u64,
    #[serde(rename = "E", default)]
    event_time: Option<u64>,
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

// ============================================================================
// Errors & Stats
// ============================================================================

/// A message that could not be turned into a depth update or snapshot
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

#[derive(Debug, Clone, Default)]
pub struct ParserStats {
    pub messages_parsed: u64,
    pub parse_errors: u64,
    pub validation_failures: u64,
    pub depth_count: u64,
    pub snapshot_count: u64,
}

impl ParserStats {
    pub fn error_rate(&self) -> f64 {
        let total = self.messages_parsed + self.parse_errors;
        if total > 0 {
            self.parse_errors as f64 / total as f64
        } else {
            0.0
        }
    }
}

// ============================================================================
// MessageParser
// ============================================================================

/// Stateful parser: symbol validation plus error accounting
pub struct MessageParser {
    pub symbol: String,
    pub stats: ParserStats,
}

impl MessageParser {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            stats: ParserStats::default(),
        }
    }

    /// Parse any supported message (auto-detects type). Failures are counted.
    pub fn parse(&mut self, raw_json: &str) -> Result<ParsedMessage, ParseError> {
        let result = self.parse_inner(raw_json);
        match &result {
            Ok(ParsedMessage::DepthUpdate(_)) => {
                self.stats.messages_parsed += 1;
                self.stats.depth_count += 1;
            }
            Ok(ParsedMessage::DepthSnapshot(_)) => {
                self.stats.messages_parsed += 1;
                self.stats.snapshot_count += 1;
            }
            Err(ParseError::ValidationFailed(_)) => {
                self.stats.parse_errors += 1;
                self.stats.validation_failures += 1;
            }
            Err(_) => self.stats.parse_errors += 1,
        }
        result
    }

    fn parse_inner(&self, raw_json: &str) -> Result<ParsedMessage, ParseError> {
        let value: serde_json::Value = serde_json::from_str(raw_json)
            .map_err(|e| ParseError::InvalidJson(e.to_string()))?;

        // Unwrap combined stream format: {"stream": "...", "data": {...}}
        let data = value.get("data").unwrap_or(&value);

        // Depth snapshot has no "e" field but has "lastUpdateId"
        if data.get("lastUpdateId").is_some() && data.get("e").is_none() {
            return parse_depth_snapshot_value(data).map(ParsedMessage::DepthSnapshot);
        }

        let event_type = data
            .get("e")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ParseError::InvalidJson("Missing event type 'e'".into()))?;

        if let Some(sym) = data.get("s").and_then(|v| v.as_str()) {
            if sym.to_uppercase() != self.symbol {
                warn!(expected = %self.symbol, got = sym, "Symbol mismatch");
                return Err(ParseError::ValidationFailed(format!(
                    "Symbol mismatch: expected {}, got {}",
                    self.symbol, sym
                )));
            }
        }

        match event_type {
            "depthUpdate" => parse_depth_update_value(data).map(ParsedMessage::DepthUpdate),
            _ => Err(ParseError::UnknownEventType(event_type.to_string())),
        }
    }
}

fn parse_depth_update_value(value: &serde_json::Value) -> Result<ParsedDepthUpdate, ParseError> {
    let raw = RawDepthUpdate::deserialize(value).map_err(|e| ParseError::InvalidJson(e.to_string()))?;

    if raw.first_update_id > raw.final_update_id {
        return Err(ParseError::ValidationFailed(format!(
            "U ({}) greater than u ({})",
            raw.first_update_id, raw.final_update_id
        )));
    }

    Ok(ParsedDepthUpdate {
        symbol: raw.symbol,
        first_update_id: raw.first_update_id,
        final_update_id: raw.final_update_id,
        prev_final_update_id: raw.prev_final_update_id,
        event_time: raw.event_time,
        bids: parse_levels(&raw.bids)?,
        asks: parse_levels(&raw.asks)?,
    })
}

fn parse_depth_snapshot_value(value: &serde_json::Value) -> Result<ParsedDepthSnapshot, ParseError> {
    let raw = RawDepthSnapshot::deserialize(value).map_err(|e| ParseError::InvalidJson(e.to_string()))?;

    Ok(ParsedDepthSnapshot {
        last_update_id: raw.last_update_id,
        event_time: raw.event_time,
        bids: parse_levels(&raw.bids)?,
        asks: parse_levels(&raw.asks)?,
    })
}

// ============================================================================
// Standalone parse functions (stateless)
// ============================================================================

/// Parse a REST `/fapi/v1/depth` response body
pub fn parse_depth_snapshot(raw_json: &str) -> Result<ParsedDepthSnapshot, ParseError> {
    let value: serde_json::Value = serde_json::from_str(raw_json)
        .map_err(|e| ParseError::InvalidJson(e.to_string()))?;
    parse_depth_snapshot_value(&value)
}

/// Parse a depth update without stateful tracking
pub fn parse_depth_update_raw(raw_json: &str) -> Result<ParsedDepthUpdate, ParseError> {
    let value: serde_json::Value = serde_json::from_str(raw_json)
        .map_err(|e| ParseError::InvalidJson(e.to_string()))?;
    parse_depth_update_value(value.get("data").unwrap_or(&value))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEPTH: &str = r#"{"e":"depthUpdate","E":1700000000000,"T":1700000000000,"s":"BTCUSDT","U":95,"u":101,"pu":94,"b":[["50000.10","1.5"],["49999.00","0"]],"a":[["50001.00","2.25"]]}"#;

    #[test]
    fn test_parse_depth_update() {
        let mut parser = MessageParser::new("btcusdt");
        match parser.parse(DEPTH).unwrap() {
            ParsedMessage::DepthUpdate(u) => {
                assert_eq!(u.first_update_id, 95);
                assert_eq!(u.final_update_id, 101);
                assert_eq!(u.prev_final_update_id, Some(94));
                assert_eq!(u.bids.len(), 2);
                assert_eq!(u.bids[0], PriceLevel::new(50000.10, 1.5));
                assert_eq!(u.bids[1].quantity, 0.0);
                assert_eq!(u.asks[0].quantity, 2.25);
            }
            other => panic!("expected depth update, got {:?}", other),
        }
        assert_eq!(parser.stats.depth_count, 1);
    }

    #[test]
    fn test_parse_combined_stream_envelope() {
        let wrapped = format!(r#"{{"stream":"btcusdt@depth@100ms","data":{}}}"#, DEPTH);
        let mut parser = MessageParser::new("BTCUSDT");
        assert!(matches!(parser.parse(&wrapped), Ok(ParsedMessage::DepthUpdate(_))));
    }

    #[test]
    fn test_parse_snapshot() {
        let body = r#"{"lastUpdateId":100,"E":1,"T":1,"bids":[["50000","3"]],"asks":[["50001","4"]]}"#;
        let snap = parse_depth_snapshot(body).unwrap();
        assert_eq!(snap.last_update_id, 100);
        assert_eq!(snap.bids[0].price, 50000.0);
        assert_eq!(snap.asks[0].quantity, 4.0);

        let mut parser = MessageParser::new("BTCUSDT");
        assert!(matches!(parser.parse(body), Ok(ParsedMessage::DepthSnapshot(_))));
    }

    #[test]
    fn test_malformed_messages_are_counted() {
        let mut parser = MessageParser::new("BTCUSDT");
        assert!(matches!(parser.parse("not json"), Err(ParseError::InvalidJson(_))));
        assert!(matches!(
            parser.parse(r#"{"e":"aggTrade","s":"BTCUSDT"}"#),
            Err(ParseError::UnknownEventType(_))
        ));
        let bad_price = DEPTH.replace("50001.00", "abc");
        assert!(parser.parse(&bad_price).is_err());
        assert_eq!(parser.stats.parse_errors, 3);
        assert_eq!(parser.stats.messages_parsed, 0);

        parser.parse(DEPTH).unwrap();
        assert!((parser.stats.error_rate() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_symbol_mismatch() {
        let mut parser = MessageParser::new("ETHUSDT");
        assert!(matches!(parser.parse(DEPTH), Err(ParseError::ValidationFailed(_))));
        assert_eq!(parser.stats.validation_failures, 1);
    }

    #[test]
    fn test_negative_quantity_rejected() {
        let bad = DEPTH.replace("\"2.25\"", "\"-1\"");
        assert!(matches!(parse_depth_update_raw(&bad), Err(ParseError::ValidationFailed(_))));
    }

    #[test]
    fn test_inverted_ids_rejected() {
        let bad = DEPTH.replace("\"U\":95", "\"U\":150");
        assert!(matches!(parse_depth_update_raw(&bad), Err(ParseError::ValidationFailed(_))));
    }
}
