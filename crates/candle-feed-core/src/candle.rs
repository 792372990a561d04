use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Width of a single candle bucket, in milliseconds.
pub const BUCKET_MS: i64 = 60_000;

/// A single one-minute OHLC candle. `timestamp` is the bucket start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

impl Candle {
    /// Build a candle from a bucket start in epoch milliseconds.
    /// Returns `None` if the timestamp is out of range.
    pub fn from_millis(
        open_time_ms: i64,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
    ) -> Option<Self> {
        let timestamp = DateTime::from_timestamp_millis(open_time_ms)?;
        Some(Self {
            timestamp,
            open,
            high,
            low,
            close,
        })
    }

    /// True if this candle and `other` aggregate the same bucket.
    pub fn same_bucket(&self, other: &Candle) -> bool {
        self.timestamp == other.timestamp
    }

    /// True if `timestamp` sits exactly on a bucket boundary.
    pub fn is_bucket_aligned(&self) -> bool {
        self.timestamp.timestamp_millis().rem_euclid(BUCKET_MS) == 0
    }

    /// True if open and close lie within [low, high].
    pub fn is_consistent(&self) -> bool {
        self.low <= self.high
            && (self.low..=self.high).contains(&self.open)
            && (self.low..=self.high).contains(&self.close)
    }
}
