use std::time::Duration;

use crate::error::ProviderError;

pub const DEFAULT_REST_BASE_URL: &str = "https://api.binance.com/api/v3";
pub const DEFAULT_WS_BASE_URL: &str = "wss://stream.binance.com:9443";
pub const DEFAULT_SNAPSHOT_LIMIT: usize = 1000;
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Endpoints and timings for the live candle feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedConfig {
    pub rest_base_url: String,
    pub ws_base_url: String,
    pub snapshot_limit: usize,
    pub reconnect_delay: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            rest_base_url: DEFAULT_REST_BASE_URL.to_string(),
            ws_base_url: DEFAULT_WS_BASE_URL.to_string(),
            snapshot_limit: DEFAULT_SNAPSHOT_LIMIT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

impl FeedConfig {
    /// Defaults overridden by `CANDLE_FEED_REST_URL`, `CANDLE_FEED_WS_URL`,
    /// `CANDLE_FEED_SNAPSHOT_LIMIT` and `CANDLE_FEED_RECONNECT_SECS`.
    pub fn from_env() -> Result<Self, ProviderError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ProviderError> {
        let mut config = Self::default();

        if let Some(url) = lookup("CANDLE_FEED_REST_URL") {
            config.rest_base_url = url;
        }
        if let Some(url) = lookup("CANDLE_FEED_WS_URL") {
            config.ws_base_url = url;
        }
        if let Some(raw) = lookup("CANDLE_FEED_SNAPSHOT_LIMIT") {
            config.snapshot_limit = raw.parse().map_err(|_| {
                ProviderError::Config(format!(
                    "CANDLE_FEED_SNAPSHOT_LIMIT is not a number: '{raw}'"
                ))
            })?;
        }
        if let Some(raw) = lookup("CANDLE_FEED_RECONNECT_SECS") {
            let secs: u64 = raw.parse().map_err(|_| {
                ProviderError::Config(format!(
                    "CANDLE_FEED_RECONNECT_SECS is not a number: '{raw}'"
                ))
            })?;
            config.reconnect_delay = Duration::from_secs(secs);
        }

        if config.snapshot_limit == 0 {
            return Err(ProviderError::Config(
                "CANDLE_FEED_SNAPSHOT_LIMIT must be at least 1".into(),
            ));
        }

        Ok(config)
    }
}
