//! Binance kline payloads: REST snapshot rows and stream events.

use std::str::FromStr;

use candle_feed_core::Candle;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use crate::error::ProviderError;

pub const INTERVAL: &str = "1m";

/// A kline stream event. Only the nested `k` object is read.
#[derive(Debug, Deserialize)]
struct KlineEvent {
    k: KlineFields,
}

#[derive(Debug, Deserialize)]
struct KlineFields {
    /// Bucket start, epoch ms
    t: i64,
    #[serde(with = "rust_decimal::serde::str")]
    o: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    h: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    l: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    c: Decimal,
}

/// Raw `/ws/<pair>@kline_1m` events and combined-stream envelopes.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum KlineMessage {
    Combined { data: KlineEvent },
    Raw(KlineEvent),
}

impl KlineFields {
    fn to_candle(&self) -> Result<Candle, ProviderError> {
        Candle::from_millis(self.t, self.o, self.h, self.l, self.c)
            .ok_or_else(|| ProviderError::Parse(format!("invalid kline open time: {}", self.t)))
    }
}

/// Parse one stream text frame into the candle it describes.
pub fn parse_stream_message(text: &str) -> Result<Candle, ProviderError> {
    let message: KlineMessage = serde_json::from_str(text)
        .map_err(|e| ProviderError::Parse(format!("invalid kline message: {e}")))?;
    match message {
        KlineMessage::Combined { data } | KlineMessage::Raw(data) => data.k.to_candle(),
    }
}

fn decimal_field(row: &[Value], idx: usize, name: &str) -> Result<Decimal, ProviderError> {
    let parsed = match row.get(idx) {
        Some(Value::String(s)) => Decimal::from_str(s).ok(),
        Some(Value::Number(n)) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    };
    parsed.ok_or_else(|| ProviderError::Parse(format!("kline row has no valid {name}")))
}

/// Parse one REST kline row `[openTimeMs, open, high, low, close, ...]`.
/// Fields past the close are ignored.
pub fn parse_rest_row(row: &[Value]) -> Result<Candle, ProviderError> {
    let open_time = row
        .first()
        .and_then(Value::as_i64)
        .ok_or_else(|| ProviderError::Parse("kline row has no open time".into()))?;

    Candle::from_millis(
        open_time,
        decimal_field(row, 1, "open")?,
        decimal_field(row, 2, "high")?,
        decimal_field(row, 3, "low")?,
        decimal_field(row, 4, "close")?,
    )
    .ok_or_else(|| ProviderError::Parse(format!("invalid kline open time: {open_time}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    const RAW_EVENT: &str = r#"{
        "e": "kline", "E": 1736951412345, "s": "BTCUSDT",
        "k": {
            "t": 1736951400000, "T": 1736951459999, "s": "BTCUSDT", "i": "1m",
            "o": "97012.34000000", "c": "97050.99000000",
            "h": "97100.00000000", "l": "96950.01000000",
            "v": "12.50000000", "n": 1042, "x": false
        }
    }"#;

    #[test]
    fn parse_raw_stream_event() {
        let candle = parse_stream_message(RAW_EVENT).unwrap();
        assert_eq!(
            candle.timestamp,
            Utc.with_ymd_and_hms(2025, 1, 15, 14, 30, 0).unwrap()
        );
        assert_eq!(candle.open, dec!(97012.34));
        assert_eq!(candle.high, dec!(97100.00));
        assert_eq!(candle.low, dec!(96950.01));
        assert_eq!(candle.close, dec!(97050.99));
    }

    #[test]
    fn parse_combined_stream_envelope() {
        let json = format!(r#"{{"stream": "btcusdt@kline_1m", "data": {RAW_EVENT}}}"#);
        let candle = parse_stream_message(&json).unwrap();
        assert_eq!(candle.close, dec!(97050.99));
    }

    #[test]
    fn malformed_stream_messages_are_errors() {
        for text in [
            "not json",
            "{}",
            r#"{"result": null, "id": 1}"#,
            r#"{"k": {"t": 1, "o": "x", "h": "1", "l": "1", "c": "1"}}"#,
            r#"{"k": {"t": 1, "o": "1", "h": "1", "l": "1"}}"#,
        ] {
            assert!(
                matches!(parse_stream_message(text), Err(ProviderError::Parse(_))),
                "expected parse error for {text}"
            );
        }
    }

    #[test]
    fn parse_rest_kline_row() {
        let row: Vec<Value> = serde_json::from_str(
            r#"[1736951400000, "97012.34", "97100.00", "96950.01", "97050.99",
                "12.5", 1736951459999, "1213000.0", 1042, "6.1", "592000.0", "0"]"#,
        )
        .unwrap();
        let candle = parse_rest_row(&row).unwrap();
        assert_eq!(candle.open, dec!(97012.34));
        assert_eq!(candle.close, dec!(97050.99));
    }

    #[test]
    fn short_rest_row_is_error() {
        let row: Vec<Value> = serde_json::from_str(r#"[1736951400000, "1", "2"]"#).unwrap();
        assert!(matches!(parse_rest_row(&row), Err(ProviderError::Parse(_))));
    }
}
