use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A trading pair such as `BTC/USDT`.
///
/// Accepts `/`, `-`, `_` and whitespace as separators. The normalized
/// symbol (`BTCUSDT`) is what REST endpoints and the store key on. The
/// lowercase form (`btcusdt`) names the kline stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TradingPair {
    display: String,
    symbol: String,
}

impl TradingPair {
    pub fn parse(input: &str) -> Result<Self, CoreError> {
        let display = input.trim();
        let symbol: String = display
            .chars()
            .filter(|c| !matches!(c, '/' | '-' | '_') && !c.is_whitespace())
            .map(|c| c.to_ascii_uppercase())
            .collect();

        if symbol.is_empty() || !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CoreError::InvalidPair(input.to_string()));
        }

        Ok(Self {
            display: display.to_string(),
            symbol,
        })
    }

    /// Uppercase symbol used by the REST API and the store (`BTCUSDT`).
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Lowercase stream name (`btcusdt`).
    pub fn stream_name(&self) -> String {
        self.symbol.to_ascii_lowercase()
    }

    /// The pair as the caller wrote it, trimmed.
    pub fn display(&self) -> &str {
        &self.display
    }
}

impl fmt::Display for TradingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

impl FromStr for TradingPair {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
