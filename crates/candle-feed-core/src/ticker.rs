use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Price movement relative to the previously observed close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    /// `Up` when `current >= previous`, or when there is no previous close.
    pub fn between(previous: Option<Decimal>, current: Decimal) -> Self {
        match previous {
            Some(prev) if current < prev => Direction::Down,
            _ => Direction::Up,
        }
    }
}

/// A current-price reading handed to the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceTick {
    pub price: Decimal,
    pub direction: Direction,
}

/// Tracks the last close seen and derives a direction for each new one.
///
/// Independent of the candle series: the comparison is against whatever
/// close was observed immediately before, not the bucket's open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriceTicker {
    last: Option<Decimal>,
    direction: Option<Direction>,
}

impl PriceTicker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the last close (after a snapshot load) without producing a tick.
    pub fn seed(&mut self, close: Decimal) {
        self.last = Some(close);
    }

    pub fn observe(&mut self, close: Decimal) -> PriceTick {
        let direction = Direction::between(self.last, close);
        self.last = Some(close);
        self.direction = Some(direction);
        PriceTick {
            price: close,
            direction,
        }
    }

    pub fn last_price(&self) -> Option<Decimal> {
        self.last
    }

    pub fn direction(&self) -> Option<Direction> {
        self.direction
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
