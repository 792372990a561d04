use crate::candle::Candle;

/// Result of applying a streaming update to a [`CandleSeries`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The update matched the open bucket and replaced its fields.
    Updated,
    /// The update opened a new bucket.
    Appended,
    /// The update referred to a bucket older than the open one and was dropped.
    Ignored,
}

/// Ordered one-minute candles, oldest first. The last candle is the open bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandleSeries {
    candles: Vec<Candle>,
}

impl CandleSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole series with a snapshot. Input need not be sorted.
    pub fn replace(&mut self, mut snapshot: Vec<Candle>) {
        snapshot.sort_by_key(|c| c.timestamp);
        snapshot.dedup_by(|later, earlier| {
            if later.same_bucket(earlier) {
                *earlier = later.clone();
                true
            } else {
                false
            }
        });
        self.candles = snapshot;
    }

    /// Upsert by bucket against the currently open candle.
    pub fn upsert(&mut self, candle: Candle) -> UpsertOutcome {
        match self.candles.last_mut() {
            Some(last) if last.timestamp == candle.timestamp => {
                *last = candle;
                UpsertOutcome::Updated
            }
            Some(last) if candle.timestamp < last.timestamp => UpsertOutcome::Ignored,
            _ => {
                self.candles.push(candle);
                UpsertOutcome::Appended
            }
        }
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn as_slice(&self) -> &[Candle] {
        &self.candles
    }

    pub fn to_vec(&self) -> Vec<Candle> {
        self.candles.clone()
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }
}
