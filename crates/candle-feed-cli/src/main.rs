use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use candle_feed_core::store::CandleStore;
use candle_feed_core::{Candle, Direction, PriceTick, TradingPair};
use candle_feed_providers::binance::{BinanceProvider, BinanceStream};
use candle_feed_providers::{
    ChartSurface, FeedConfig, LiveCandleFeed, SnapshotProvider, StartOutcome,
};
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(
    name = "candle-feed",
    about = "Watch live one-minute candles and manage stored history"
)]
struct Cli {
    /// Root directory for data storage (default: current directory)
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// REST base URL (overrides CANDLE_FEED_REST_URL)
    #[arg(long)]
    rest_url: Option<String>,

    /// WebSocket base URL (overrides CANDLE_FEED_WS_URL)
    #[arg(long)]
    ws_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream live candles for a pair until Ctrl-C
    Watch {
        /// Trading pair, e.g. BTC/USDT
        #[arg(short, long)]
        pair: TradingPair,

        /// Persist every closed candle to the store
        #[arg(long)]
        record: bool,
    },

    /// Fetch the latest candles for a pair and store them
    History {
        /// Trading pair, e.g. BTC/USDT
        #[arg(short, long)]
        pair: TradingPair,

        /// Number of one-minute candles to fetch
        #[arg(
            long,
            default_value_t = 1000,
            value_parser = clap::value_parser!(u16).range(1..=1000)
        )]
        limit: u16,
    },

    /// Show what data exists in the store
    Status {
        /// Filter by pair (shows all if omitted)
        #[arg(short, long)]
        pair: Option<TradingPair>,
    },

    /// Validate Parquet files and report issues
    Validate {
        /// Pairs to validate (all if omitted, comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        pairs: Option<Vec<TradingPair>>,
    },
}

impl Cli {
    fn feed_config(&self) -> Result<FeedConfig> {
        let mut config = FeedConfig::from_env().context("invalid feed configuration")?;
        if let Some(url) = &self.rest_url {
            config.rest_base_url = url.clone();
        }
        if let Some(url) = &self.ws_url {
            config.ws_base_url = url.clone();
        }
        Ok(config)
    }
}

/// Prints candles and price ticks; optionally hands closed candles to a recorder.
struct TerminalSurface {
    pair: TradingPair,
    open_bucket: Mutex<Option<Candle>>,
    recorder: Mutex<Option<mpsc::UnboundedSender<Vec<Candle>>>>,
}

impl TerminalSurface {
    fn new(pair: TradingPair, recorder: Option<mpsc::UnboundedSender<Vec<Candle>>>) -> Self {
        Self {
            pair,
            open_bucket: Mutex::new(None),
            recorder: Mutex::new(recorder),
        }
    }

    fn record(&self, closed: Vec<Candle>) {
        if closed.is_empty() {
            return;
        }
        if let Some(tx) = self.recorder.lock().as_ref()
            && tx.send(closed).is_err()
        {
            warn!("recorder stopped, closed candles dropped");
        }
    }

    /// Drop the recorder channel so the writer can drain and exit.
    fn finish(&self) {
        self.recorder.lock().take();
    }
}

impl ChartSurface for TerminalSurface {
    fn set_series(&self, candles: &[Candle]) {
        println!("{}: loaded {} candle(s)", self.pair, candles.len());
        if let Some((open, closed)) = candles.split_last() {
            *self.open_bucket.lock() = Some(open.clone());
            self.record(closed.to_vec());
        }
    }

    fn update_candle(&self, candle: &Candle) {
        let closed = {
            let mut open = self.open_bucket.lock();
            let closed = open
                .take()
                .filter(|previous| previous.timestamp < candle.timestamp);
            *open = Some(candle.clone());
            closed
        };
        if let Some(closed) = closed {
            self.record(vec![closed]);
        }

        println!(
            "{} {} O {} H {} L {} C {}",
            self.pair,
            candle.timestamp.format("%Y-%m-%d %H:%M"),
            candle.open,
            candle.high,
            candle.low,
            candle.close
        );
    }

    fn update_price(&self, tick: &PriceTick) {
        let arrow = match tick.direction {
            Direction::Up => "▲",
            Direction::Down => "▼",
        };
        println!("{}: {arrow} {}", self.pair, tick.price);
    }
}

async fn cmd_watch(
    data_dir: &std::path::Path,
    config: FeedConfig,
    pair: &TradingPair,
    record: bool,
) -> Result<()> {
    let (record_tx, recorder) = if record {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<Candle>>();
        let store = CandleStore::new(data_dir);
        let symbol = pair.symbol().to_string();
        let handle = tokio::task::spawn_blocking(move || {
            while let Some(batch) = rx.blocking_recv() {
                match store.merge_candles(&symbol, &batch) {
                    Ok(days) => {
                        for (date, count) in days {
                            debug!("{symbol}: {date}: {count} candle(s) stored");
                        }
                    }
                    Err(e) => warn!("{symbol}: failed to record candles: {e}"),
                }
            }
        });
        (Some(tx), Some(handle))
    } else {
        (None, None)
    };

    let surface = Arc::new(TerminalSurface::new(pair.clone(), record_tx));
    let feed = LiveCandleFeed::new(
        Arc::new(BinanceProvider::from_config(&config)),
        Arc::new(BinanceStream::from_config(&config)),
        surface.clone(),
        config,
    );

    match feed.start(pair.clone()).await {
        StartOutcome::Loaded(count) => info!("{pair}: streaming after {count} snapshot candle(s)"),
        StartOutcome::SnapshotFailed => warn!("{pair}: streaming without snapshot"),
        StartOutcome::Superseded => {}
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("{pair}: shutting down");

    feed.stop();
    surface.finish();
    if let Some(handle) = recorder {
        handle.await.context("recorder task panicked")?;
    }

    Ok(())
}

async fn cmd_history(
    store: &CandleStore,
    config: &FeedConfig,
    pair: &TradingPair,
    limit: usize,
) -> Result<()> {
    let provider = BinanceProvider::from_config(config);
    info!("Using provider: {}", provider.name());

    let candles = provider
        .fetch_recent(pair, limit)
        .await
        .with_context(|| format!("failed to fetch candles for {pair}"))?;

    if candles.is_empty() {
        info!("{pair}: no candles returned");
        return Ok(());
    }

    let days = store
        .merge_candles(pair.symbol(), &candles)
        .with_context(|| format!("failed to store candles for {pair}"))?;
    for (date, count) in &days {
        info!("{}: {date}: {count} candle(s) on disk", pair.symbol());
    }
    info!(
        "{pair}: stored {} candle(s) across {} day(s)",
        candles.len(),
        days.len()
    );

    Ok(())
}

fn cmd_status(store: &CandleStore, pair: Option<&TradingPair>) -> Result<()> {
    let symbols = match pair {
        Some(p) => vec![p.symbol().to_string()],
        None => store.list_pairs().context("failed to list pairs")?,
    };

    if symbols.is_empty() {
        println!("No data in store.");
        return Ok(());
    }

    for sym in &symbols {
        match store
            .date_range(sym)
            .with_context(|| format!("failed to list dates for {sym}"))?
        {
            Some((first, last)) => {
                let days = store.list_dates(sym)?.len();
                println!("{sym}: {days} day(s), {first} to {last}");
            }
            None => println!("{sym}: no data"),
        }
    }

    Ok(())
}

/// Problems found in one day file.
fn day_issues(candles: &[Candle]) -> Vec<String> {
    if candles.is_empty() {
        return vec!["empty file".to_string()];
    }

    let mut issues = Vec::new();

    if let Some(i) = (1..candles.len()).find(|&i| candles[i].timestamp <= candles[i - 1].timestamp)
    {
        issues.push(format!("timestamps not strictly ascending at index {i}"));
    }

    let misaligned = candles.iter().filter(|c| !c.is_bucket_aligned()).count();
    if misaligned > 0 {
        issues.push(format!("{misaligned} candle(s) not on a minute boundary"));
    }

    let inconsistent = candles.iter().filter(|c| !c.is_consistent()).count();
    if inconsistent > 0 {
        issues.push(format!("{inconsistent} candle(s) with open/close outside low..high"));
    }

    issues
}

fn cmd_validate(store: &CandleStore, pairs: Option<&[TradingPair]>) -> Result<()> {
    let symbols: Vec<String> = match pairs {
        Some(list) => list.iter().map(|p| p.symbol().to_string()).collect(),
        None => store.list_pairs().context("failed to list pairs")?,
    };

    if symbols.is_empty() {
        println!("No data to validate.");
        return Ok(());
    }

    let mut issues = 0;

    for sym in &symbols {
        let dates = store
            .list_dates(sym)
            .with_context(|| format!("failed to list dates for {sym}"))?;

        for date in &dates {
            match store.read_day(sym, *date) {
                Ok(candles) => {
                    for issue in day_issues(&candles) {
                        println!("WARN: {sym} {date}: {issue}");
                        issues += 1;
                    }
                }
                Err(e) => {
                    println!("ERROR: {sym} {date}: failed to read: {e}");
                    issues += 1;
                }
            }
        }
    }

    if issues == 0 {
        println!("All files valid.");
    } else {
        println!("{issues} issue(s) found.");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = cli.feed_config()?;
    let store = CandleStore::new(&cli.data_dir);

    match &cli.command {
        Commands::Watch { pair, record } => {
            cmd_watch(&cli.data_dir, config, pair, *record).await?;
        }
        Commands::History { pair, limit } => {
            cmd_history(&store, &config, pair, usize::from(*limit)).await?;
        }
        Commands::Status { pair } => {
            cmd_status(&store, pair.as_ref())?;
        }
        Commands::Validate { pairs } => {
            cmd_validate(&store, pairs.as_deref())?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use clap::Parser;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn candle(min: u32, close: Decimal) -> Candle {
        Candle {
            timestamp: Utc.with_ymd_and_hms(2025, 1, 15, 14, min, 0).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
        }
    }

    #[test]
    fn parse_watch_args() {
        let cli =
            Cli::try_parse_from(["candle-feed", "watch", "-p", "BTC/USDT", "--record"]).unwrap();
        match cli.command {
            Commands::Watch { pair, record } => {
                assert_eq!(pair.symbol(), "BTCUSDT");
                assert!(record);
            }
            _ => panic!("expected Watch command"),
        }
    }

    #[test]
    fn parse_watch_rejects_bad_pair() {
        assert!(Cli::try_parse_from(["candle-feed", "watch", "-p", "BTC$USDT"]).is_err());
    }

    #[test]
    fn parse_history_defaults() {
        let cli = Cli::try_parse_from(["candle-feed", "history", "-p", "eth-usdt"]).unwrap();
        match cli.command {
            Commands::History { pair, limit } => {
                assert_eq!(pair.symbol(), "ETHUSDT");
                assert_eq!(limit, 1000);
            }
            _ => panic!("expected History command"),
        }
    }

    #[test]
    fn parse_history_limit_out_of_range() {
        assert!(
            Cli::try_parse_from(["candle-feed", "history", "-p", "BTCUSDT", "--limit", "1001"])
                .is_err()
        );
        assert!(
            Cli::try_parse_from(["candle-feed", "history", "-p", "BTCUSDT", "--limit", "0"])
                .is_err()
        );
    }

    #[test]
    fn parse_status_no_pair() {
        let cli = Cli::try_parse_from(["candle-feed", "status"]).unwrap();
        match cli.command {
            Commands::Status { pair } => assert!(pair.is_none()),
            _ => panic!("expected Status command"),
        }
    }

    #[test]
    fn parse_validate_args() {
        let cli =
            Cli::try_parse_from(["candle-feed", "validate", "-p", "BTC/USDT,ETH/USDT"]).unwrap();
        match cli.command {
            Commands::Validate { pairs } => {
                let symbols: Vec<String> = pairs
                    .unwrap()
                    .iter()
                    .map(|p| p.symbol().to_string())
                    .collect();
                assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT"]);
            }
            _ => panic!("expected Validate command"),
        }
    }

    #[test]
    fn url_flags_override_config() {
        let cli = Cli::try_parse_from([
            "candle-feed",
            "--rest-url",
            "http://localhost:8080/api/v3",
            "--ws-url",
            "ws://localhost:9000",
            "status",
        ])
        .unwrap();
        let config = cli.feed_config().unwrap();
        assert_eq!(config.rest_base_url, "http://localhost:8080/api/v3");
        assert_eq!(config.ws_base_url, "ws://localhost:9000");
    }

    #[test]
    fn terminal_surface_records_closed_buckets() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let surface = TerminalSurface::new(TradingPair::parse("BTC/USDT").unwrap(), Some(tx));

        surface.set_series(&[candle(0, dec!(100)), candle(1, dec!(101))]);
        assert_eq!(rx.try_recv().unwrap(), vec![candle(0, dec!(100))]);

        // Same bucket again: nothing closes.
        surface.update_candle(&candle(1, dec!(102)));
        assert!(rx.try_recv().is_err());

        surface.update_candle(&candle(2, dec!(103)));
        assert_eq!(rx.try_recv().unwrap(), vec![candle(1, dec!(102))]);

        surface.finish();
        surface.update_candle(&candle(3, dec!(104)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn day_issues_flags_bad_candles() {
        assert!(day_issues(&[candle(0, dec!(1)), candle(1, dec!(2))]).is_empty());
        assert_eq!(day_issues(&[]), vec!["empty file"]);

        let mut broken = candle(2, dec!(5));
        broken.close = dec!(6);
        let issues = day_issues(&[candle(3, dec!(1)), broken]);
        assert_eq!(issues.len(), 2);
    }
}
