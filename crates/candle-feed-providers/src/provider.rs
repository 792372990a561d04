use async_trait::async_trait;
use candle_feed_core::{Candle, TradingPair};
use futures_util::stream::BoxStream;

use crate::error::ProviderError;

/// Text frames from one streaming connection. The stream ending, or
/// yielding an error, means the connection is closed.
pub type MessageStream = BoxStream<'static, Result<String, ProviderError>>;

/// Fetches the most recent one-minute candles for a pair.
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    /// Provider name (for logging/display).
    fn name(&self) -> &str;

    /// Fetch up to `limit` of the latest candles, sorted by timestamp.
    async fn fetch_recent(
        &self,
        pair: &TradingPair,
        limit: usize,
    ) -> Result<Vec<Candle>, ProviderError>;
}

/// Opens a kline stream for a pair.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    fn name(&self) -> &str;

    async fn connect(&self, pair: &TradingPair) -> Result<MessageStream, ProviderError>;
}
