pub mod binance;
pub mod config;
pub mod error;
pub mod feed;
pub mod kline;
pub mod provider;

pub use config::FeedConfig;
pub use error::ProviderError;
pub use feed::{ChartSurface, LiveCandleFeed, StartOutcome, Viewport};
pub use provider::{MessageStream, SnapshotProvider, StreamConnector};
