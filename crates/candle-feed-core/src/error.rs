use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("No data found for {pair} on {date}")]
    NoData {
        pair: String,
        date: chrono::NaiveDate,
    },

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Invalid trading pair '{0}'")]
    InvalidPair(String),
}
