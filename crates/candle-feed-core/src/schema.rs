use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, StringArray, TimestampMillisecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use rust_decimal::Decimal;

use crate::candle::Candle;
use crate::error::CoreError;

/// Prices are stored as strings so decimals round-trip exactly.
pub fn candle_schema() -> Schema {
    Schema::new(vec![
        Field::new(
            "open_time",
            DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())),
            false,
        ),
        Field::new("open", DataType::Utf8, false),
        Field::new("high", DataType::Utf8, false),
        Field::new("low", DataType::Utf8, false),
        Field::new("close", DataType::Utf8, false),
    ])
}

fn price_column(candles: &[Candle], field: impl Fn(&Candle) -> Decimal) -> ArrayRef {
    let values: Vec<String> = candles.iter().map(|c| field(c).to_string()).collect();
    Arc::new(StringArray::from(values))
}

pub fn candles_to_record_batch(candles: &[Candle]) -> Result<RecordBatch, CoreError> {
    let schema = Arc::new(candle_schema());

    let open_times: Vec<i64> = candles
        .iter()
        .map(|c| c.timestamp.timestamp_millis())
        .collect();

    let columns: Vec<ArrayRef> = vec![
        Arc::new(TimestampMillisecondArray::from(open_times).with_timezone("UTC")),
        price_column(candles, |c| c.open),
        price_column(candles, |c| c.high),
        price_column(candles, |c| c.low),
        price_column(candles, |c| c.close),
    ];

    Ok(RecordBatch::try_new(schema, columns)?)
}

fn string_column<'a>(
    batch: &'a RecordBatch,
    idx: usize,
    name: &str,
) -> Result<&'a StringArray, CoreError> {
    batch
        .column(idx)
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| CoreError::InvalidData(format!("expected {name} column")))
}

fn parse_price(column: &StringArray, row: usize, name: &str) -> Result<Decimal, CoreError> {
    column
        .value(row)
        .parse()
        .map_err(|e| CoreError::InvalidData(format!("invalid {name}: {e}")))
}

pub fn record_batch_to_candles(batch: &RecordBatch) -> Result<Vec<Candle>, CoreError> {
    let open_times = batch
        .column(0)
        .as_any()
        .downcast_ref::<TimestampMillisecondArray>()
        .ok_or_else(|| CoreError::InvalidData("expected open_time column".into()))?;

    let opens = string_column(batch, 1, "open")?;
    let highs = string_column(batch, 2, "high")?;
    let lows = string_column(batch, 3, "low")?;
    let closes = string_column(batch, 4, "close")?;

    let mut candles = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let millis = open_times.value(i);
        let candle = Candle::from_millis(
            millis,
            parse_price(opens, i, "open")?,
            parse_price(highs, i, "high")?,
            parse_price(lows, i, "low")?,
            parse_price(closes, i, "close")?,
        )
        .ok_or_else(|| CoreError::InvalidData(format!("invalid open_time: {millis}")))?;
        candles.push(candle);
    }

    Ok(candles)
}

pub fn write_parquet(path: &Path, candles: &[Candle]) -> Result<(), CoreError> {
    let batch = candles_to_record_batch(candles)?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let file = std::fs::File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(&batch)?;
    writer.close()?;

    Ok(())
}

pub fn read_parquet(path: &Path) -> Result<Vec<Candle>, CoreError> {
    let file = std::fs::File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut all_candles = Vec::new();
    for batch in reader {
        all_candles.extend(record_batch_to_candles(&batch?)?);
    }

    Ok(all_candles)
}
