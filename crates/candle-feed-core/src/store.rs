use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::debug;

use crate::candle::Candle;
use crate::error::CoreError;
use crate::schema;
use crate::series::CandleSeries;

/// Filesystem-backed store for one-minute candles in Parquet format.
///
/// Directory layout: `{root}/data/{SYMBOL}/{YYYY}/{MM}/{YYYY-MM-DD}.parquet`
pub struct CandleStore {
    data_dir: PathBuf,
}

impl CandleStore {
    /// Create a store rooted at the given directory.
    /// The `data/` subdirectory is used automatically.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            data_dir: root.as_ref().join("data"),
        }
    }

    /// Path to the Parquet file for a given symbol and date.
    pub fn file_path(&self, symbol: &str, date: NaiveDate) -> PathBuf {
        self.data_dir
            .join(symbol)
            .join(date.format("%Y").to_string())
            .join(date.format("%m").to_string())
            .join(format!("{}.parquet", date.format("%Y-%m-%d")))
    }

    pub fn has_data(&self, symbol: &str, date: NaiveDate) -> bool {
        self.file_path(symbol, date).exists()
    }

    /// Write candles for a single UTC date. Overwrites an existing file.
    pub fn write_day(
        &self,
        symbol: &str,
        date: NaiveDate,
        candles: &[Candle],
    ) -> Result<(), CoreError> {
        if let Some(stray) = candles.iter().find(|c| c.timestamp.date_naive() != date) {
            return Err(CoreError::InvalidData(format!(
                "candle at {} does not belong to {date}",
                stray.timestamp
            )));
        }

        let path = self.file_path(symbol, date);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        schema::write_parquet(&path, candles)
    }

    /// Upsert candles into the file for `date`, keyed by bucket.
    /// Incoming candles win over stored ones. Returns the resulting count.
    pub fn merge_day(
        &self,
        symbol: &str,
        date: NaiveDate,
        candles: &[Candle],
    ) -> Result<usize, CoreError> {
        let mut merged = if self.has_data(symbol, date) {
            self.read_day(symbol, date)?
        } else {
            Vec::new()
        };
        merged.extend_from_slice(candles);

        let mut series = CandleSeries::new();
        series.replace(merged);
        debug!(symbol, %date, candles = series.len(), "merging day file");

        self.write_day(symbol, date, series.as_slice())?;
        Ok(series.len())
    }

    /// Group candles by UTC date and merge each group into its day file.
    /// Returns `(date, count)` per file touched.
    pub fn merge_candles(
        &self,
        symbol: &str,
        candles: &[Candle],
    ) -> Result<Vec<(NaiveDate, usize)>, CoreError> {
        let mut by_day: BTreeMap<NaiveDate, Vec<Candle>> = BTreeMap::new();
        for candle in candles {
            by_day
                .entry(candle.timestamp.date_naive())
                .or_default()
                .push(candle.clone());
        }

        by_day
            .into_iter()
            .map(|(date, day)| Ok((date, self.merge_day(symbol, date, &day)?)))
            .collect()
    }

    pub fn read_day(&self, symbol: &str, date: NaiveDate) -> Result<Vec<Candle>, CoreError> {
        let path = self.file_path(symbol, date);
        if !path.exists() {
            return Err(CoreError::NoData {
                pair: symbol.to_string(),
                date,
            });
        }
        schema::read_parquet(&path)
    }

    /// Read candles across a date range (inclusive), sorted by timestamp.
    /// Dates without a file are skipped.
    pub fn read_range(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Candle>, CoreError> {
        let mut all_candles = Vec::new();

        for date in start.iter_days().take_while(|d| *d <= end) {
            if self.has_data(symbol, date) {
                all_candles.extend(schema::read_parquet(&self.file_path(symbol, date))?);
            }
        }

        all_candles.sort_by_key(|c| c.timestamp);
        Ok(all_candles)
    }

    /// List all pair symbols that have data in the store.
    pub fn list_pairs(&self) -> Result<Vec<String>, CoreError> {
        if !self.data_dir.exists() {
            return Ok(Vec::new());
        }

        let mut symbols = Vec::new();
        for entry in std::fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                symbols.push(name.to_string());
            }
        }
        symbols.sort();
        Ok(symbols)
    }

    /// List all dates with data for a symbol, sorted ascending.
    pub fn list_dates(&self, symbol: &str) -> Result<Vec<NaiveDate>, CoreError> {
        let symbol_dir = self.data_dir.join(symbol);
        if !symbol_dir.exists() {
            return Ok(Vec::new());
        }

        let mut dates = Vec::new();

        for year_entry in std::fs::read_dir(&symbol_dir)? {
            let year_entry = year_entry?;
            if !year_entry.file_type()?.is_dir() {
                continue;
            }

            for month_entry in std::fs::read_dir(year_entry.path())? {
                let month_entry = month_entry?;
                if !month_entry.file_type()?.is_dir() {
                    continue;
                }

                for file_entry in std::fs::read_dir(month_entry.path())? {
                    let file_name = file_entry?.file_name();
                    let name = file_name.to_string_lossy();
                    if let Some(date_str) = name.strip_suffix(".parquet")
                        && let Ok(date) = NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
                    {
                        dates.push(date);
                    }
                }
            }
        }

        dates.sort();
        Ok(dates)
    }

    /// Earliest and latest stored date for a symbol, or None if no data.
    pub fn date_range(&self, symbol: &str) -> Result<Option<(NaiveDate, NaiveDate)>, CoreError> {
        let dates = self.list_dates(symbol)?;
        Ok(dates.first().copied().zip(dates.last().copied()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn make_candle(day: u32, hour: u32, min: u32, close: Decimal) -> Candle {
        Candle {
            timestamp: Utc.with_ymd_and_hms(2025, 1, day, hour, min, 0).unwrap(),
            open: dec!(100.00),
            high: dec!(110.00),
            low: dec!(90.00),
            close,
        }
    }

    fn make_candles_for_day(day: u32) -> Vec<Candle> {
        vec![
            make_candle(day, 0, 0, dec!(101.00)),
            make_candle(day, 0, 1, dec!(102.00)),
        ]
    }

    #[test]
    fn file_path_format() {
        let dir = tempfile::tempdir().unwrap();
        let store = CandleStore::new(dir.path());
        let path = store.file_path("BTCUSDT", date(2025, 1, 15));
        let expected = dir.path().join("data/BTCUSDT/2025/01/2025-01-15.parquet");
        assert_eq!(path, expected);
    }

    #[test]
    fn write_and_read_day() {
        let dir = tempfile::tempdir().unwrap();
        let store = CandleStore::new(dir.path());
        let candles = make_candles_for_day(15);

        assert!(!store.has_data("BTCUSDT", date(2025, 1, 15)));
        store
            .write_day("BTCUSDT", date(2025, 1, 15), &candles)
            .unwrap();
        assert!(store.has_data("BTCUSDT", date(2025, 1, 15)));
        assert!(dir.path().join("data/BTCUSDT/2025/01").exists());

        let result = store.read_day("BTCUSDT", date(2025, 1, 15)).unwrap();
        assert_eq!(result, candles);
    }

    #[test]
    fn write_day_rejects_candles_from_other_dates() {
        let dir = tempfile::tempdir().unwrap();
        let store = CandleStore::new(dir.path());
        let result = store.write_day("BTCUSDT", date(2025, 1, 15), &make_candles_for_day(16));
        assert!(matches!(result, Err(CoreError::InvalidData(_))));
    }

    #[test]
    fn read_day_missing_returns_no_data() {
        let dir = tempfile::tempdir().unwrap();
        let store = CandleStore::new(dir.path());
        let result = store.read_day("BTCUSDT", date(2025, 1, 15));
        assert!(matches!(result, Err(CoreError::NoData { .. })));
    }

    #[test]
    fn merge_day_upserts_by_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let store = CandleStore::new(dir.path());
        let d = date(2025, 1, 15);

        store.write_day("BTCUSDT", d, &make_candles_for_day(15)).unwrap();

        let incoming = vec![
            make_candle(15, 0, 1, dec!(105.00)),
            make_candle(15, 0, 2, dec!(106.00)),
        ];
        let count = store.merge_day("BTCUSDT", d, &incoming).unwrap();
        assert_eq!(count, 3);

        let closes: Vec<Decimal> = store
            .read_day("BTCUSDT", d)
            .unwrap()
            .iter()
            .map(|c| c.close)
            .collect();
        assert_eq!(closes, vec![dec!(101.00), dec!(105.00), dec!(106.00)]);
    }

    #[test]
    fn merge_candles_splits_on_utc_midnight() {
        let dir = tempfile::tempdir().unwrap();
        let store = CandleStore::new(dir.path());

        let candles = vec![
            make_candle(15, 23, 59, dec!(101.00)),
            make_candle(16, 0, 0, dec!(102.00)),
            make_candle(16, 0, 1, dec!(103.00)),
        ];
        let written = store.merge_candles("BTCUSDT", &candles).unwrap();
        assert_eq!(written, vec![(date(2025, 1, 15), 1), (date(2025, 1, 16), 2)]);
    }

    #[test]
    fn read_range_multiple_days_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let store = CandleStore::new(dir.path());

        // Weekends are trading days too.
        for day in [17, 18, 19] {
            store
                .write_day("ETHUSDT", date(2025, 1, day), &make_candles_for_day(day))
                .unwrap();
        }

        let result = store
            .read_range("ETHUSDT", date(2025, 1, 16), date(2025, 1, 20))
            .unwrap();
        assert_eq!(result.len(), 6);
        for i in 1..result.len() {
            assert!(result[i].timestamp > result[i - 1].timestamp);
        }
    }

    #[test]
    fn list_pairs_and_dates() {
        let dir = tempfile::tempdir().unwrap();
        let store = CandleStore::new(dir.path());
        assert!(store.list_pairs().unwrap().is_empty());
        assert_eq!(store.date_range("BTCUSDT").unwrap(), None);

        store
            .write_day("BTCUSDT", date(2025, 1, 15), &make_candles_for_day(15))
            .unwrap();
        store
            .write_day("BTCUSDT", date(2025, 1, 2), &make_candles_for_day(2))
            .unwrap();
        store
            .write_day("ETHUSDT", date(2025, 1, 15), &make_candles_for_day(15))
            .unwrap();

        assert_eq!(store.list_pairs().unwrap(), vec!["BTCUSDT", "ETHUSDT"]);
        assert_eq!(
            store.list_dates("BTCUSDT").unwrap(),
            vec![date(2025, 1, 2), date(2025, 1, 15)]
        );
        assert_eq!(
            store.date_range("BTCUSDT").unwrap(),
            Some((date(2025, 1, 2), date(2025, 1, 15)))
        );
    }
}
