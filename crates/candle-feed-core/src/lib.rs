pub mod candle;
pub mod error;
pub mod pair;
pub mod schema;
pub mod series;
pub mod store;
pub mod ticker;

pub use candle::Candle;
pub use error::CoreError;
pub use pair::TradingPair;
pub use series::{CandleSeries, UpsertOutcome};
pub use ticker::{Direction, PriceTick, PriceTicker};
