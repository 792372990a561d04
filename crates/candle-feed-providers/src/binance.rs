use async_trait::async_trait;
use candle_feed_core::{Candle, TradingPair};
use futures_util::{StreamExt, future};
use reqwest::Client;
use serde_json::Value;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};

use crate::config::FeedConfig;
use crate::error::ProviderError;
use crate::kline::{self, INTERVAL};
use crate::provider::{MessageStream, SnapshotProvider, StreamConnector};

/// Binance spot REST klines. No authentication required.
pub struct BinanceProvider {
    client: Client,
    base_url: String,
}

impl BinanceProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    pub fn from_config(config: &FeedConfig) -> Self {
        Self::new(config.rest_base_url.clone())
    }

    fn snapshot_request(
        &self,
        pair: &TradingPair,
        limit: usize,
    ) -> Result<reqwest::Request, ProviderError> {
        let limit = limit.to_string();
        let request = self
            .client
            .get(format!("{}/klines", self.base_url.trim_end_matches('/')))
            .query(&[
                ("symbol", pair.symbol()),
                ("interval", INTERVAL),
                ("limit", limit.as_str()),
            ])
            .build()?;
        Ok(request)
    }
}

#[async_trait]
impl SnapshotProvider for BinanceProvider {
    fn name(&self) -> &str {
        "binance"
    }

    async fn fetch_recent(
        &self,
        pair: &TradingPair,
        limit: usize,
    ) -> Result<Vec<Candle>, ProviderError> {
        let request = self.snapshot_request(pair, limit)?;
        debug!(url = %request.url(), "fetching kline snapshot");

        let response = self.client.execute(request).await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(ProviderError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status,
                message: body,
            });
        }

        let rows: Vec<Vec<Value>> = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(format!("failed to parse response: {e}")))?;

        parse_snapshot(&rows)
    }
}

fn parse_snapshot(rows: &[Vec<Value>]) -> Result<Vec<Candle>, ProviderError> {
    let mut candles = rows
        .iter()
        .map(|row| kline::parse_rest_row(row))
        .collect::<Result<Vec<_>, _>>()?;
    candles.sort_by_key(|c| c.timestamp);
    Ok(candles)
}

/// Binance `<pair>@kline_1m` WebSocket stream.
pub struct BinanceStream {
    ws_base_url: String,
}

impl BinanceStream {
    pub fn new(ws_base_url: impl Into<String>) -> Self {
        Self {
            ws_base_url: ws_base_url.into(),
        }
    }

    pub fn from_config(config: &FeedConfig) -> Self {
        Self::new(config.ws_base_url.clone())
    }

    pub fn stream_url(&self, pair: &TradingPair) -> String {
        format!(
            "{}/ws/{}@kline_{INTERVAL}",
            self.ws_base_url.trim_end_matches('/'),
            pair.stream_name()
        )
    }
}

#[async_trait]
impl StreamConnector for BinanceStream {
    fn name(&self) -> &str {
        "binance"
    }

    async fn connect(&self, pair: &TradingPair) -> Result<MessageStream, ProviderError> {
        let url = self.stream_url(pair);
        info!(url = %url, pair = %pair, "connecting to kline stream");

        let (ws_stream, _response) = connect_async(url.as_str()).await?;

        // A close frame ends the stream; ping/pong and binary frames are skipped.
        let messages = ws_stream
            .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
            .filter_map(|msg| {
                future::ready(match msg {
                    Ok(Message::Text(text)) => Some(Ok(text)),
                    Ok(_) => None,
                    Err(e) => Some(Err(ProviderError::from(e))),
                })
            });

        Ok(messages.boxed())
    }
}
