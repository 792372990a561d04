//! Live candle feed: a REST snapshot followed by a reconnecting kline stream,
//! merged into one upsert-by-bucket series and pushed to a [`ChartSurface`].
//!
//! All mutable state sits behind a single lock that is never held across an
//! `.await`. Every spawned task carries the generation it was started under
//! and re-checks it under the lock before touching state, so a stopped or
//! superseded task can neither apply updates nor schedule a reconnect.

use std::sync::Arc;

use candle_feed_core::{
    Candle, CandleSeries, PriceTick, PriceTicker, TradingPair, UpsertOutcome,
};
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::FeedConfig;
use crate::kline;
use crate::provider::{SnapshotProvider, StreamConnector};

/// Observed size of the chart container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// The rendering side of the feed.
///
/// Callbacks run while the feed holds its state lock: they are delivered in
/// order and never after [`LiveCandleFeed::stop`] returns. Implementations
/// must not call back into the feed.
pub trait ChartSurface: Send + Sync {
    /// Replace everything drawn with a freshly loaded snapshot.
    fn set_series(&self, candles: &[Candle]);

    /// Move the view so the newest candle is visible.
    fn scroll_to_latest(&self) {}

    /// Redraw or append the candle for one bucket.
    fn update_candle(&self, candle: &Candle);

    /// Current-price display, independent of the chart.
    fn update_price(&self, tick: &PriceTick);

    fn resize(&self, _viewport: Viewport) {}
}

/// How a call to [`LiveCandleFeed::start`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Snapshot applied with this many candles; streaming started.
    Loaded(usize),
    /// Snapshot failed; streaming started. The previous series is kept only
    /// when the same pair was restarted, otherwise the series starts empty.
    SnapshotFailed,
    /// A later `start` or `stop` took over while the snapshot was in flight.
    Superseded,
}

struct Shared {
    snapshots: Arc<dyn SnapshotProvider>,
    connector: Arc<dyn StreamConnector>,
    surface: Arc<dyn ChartSurface>,
    config: FeedConfig,
    state: Mutex<FeedState>,
}

#[derive(Default)]
struct FeedState {
    generation: u64,
    pair: Option<TradingPair>,
    /// Symbol the series and ticker currently hold data for.
    series_symbol: Option<String>,
    series: CandleSeries,
    ticker: PriceTicker,
    stream: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    resize_epoch: u64,
    resize: Option<JoinHandle<()>>,
}

impl FeedState {
    /// Invalidate running tasks, then release the stream and the pending
    /// reconnect timer, in that order.
    fn disarm(&mut self) {
        self.generation += 1;
        if let Some(stream) = self.stream.take() {
            stream.abort();
        }
        if let Some(timer) = self.reconnect.take() {
            timer.abort();
        }
    }

    fn detach_resize(&mut self) {
        self.resize_epoch += 1;
        if let Some(observer) = self.resize.take() {
            observer.abort();
        }
    }
}

/// Live one-minute candle feed for a single pair at a time.
pub struct LiveCandleFeed {
    shared: Arc<Shared>,
}

impl LiveCandleFeed {
    pub fn new(
        snapshots: Arc<dyn SnapshotProvider>,
        connector: Arc<dyn StreamConnector>,
        surface: Arc<dyn ChartSurface>,
        config: FeedConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                snapshots,
                connector,
                surface,
                config,
                state: Mutex::new(FeedState::default()),
            }),
        }
    }

    /// Load the latest snapshot for `pair` and start streaming it.
    ///
    /// Any stream or pending reconnect from an earlier `start` is torn down
    /// first. Switching to another pair clears the series and ticker before
    /// the fetch. Snapshot failures are logged and leave the current series
    /// in place; the stream is opened either way.
    pub async fn start(&self, pair: TradingPair) -> StartOutcome {
        let generation = {
            let mut state = self.shared.state.lock();
            state.disarm();
            if state.series_symbol.as_deref() != Some(pair.symbol()) {
                if !state.series.is_empty() {
                    state.series = CandleSeries::new();
                    self.shared.surface.set_series(&[]);
                }
                state.ticker.reset();
                state.series_symbol = Some(pair.symbol().to_string());
            }
            state.pair = Some(pair.clone());
            state.generation
        };

        info!(
            pair = %pair,
            provider = self.shared.snapshots.name(),
            "starting candle feed"
        );
        let snapshot = self
            .shared
            .snapshots
            .fetch_recent(&pair, self.shared.config.snapshot_limit)
            .await;

        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        if state.generation != generation {
            debug!(pair = %pair, "snapshot discarded, feed restarted or stopped meanwhile");
            return StartOutcome::Superseded;
        }

        let outcome = match snapshot {
            Ok(candles) => {
                state.series.replace(candles);
                state.ticker.reset();
                if let Some(last) = state.series.last() {
                    state.ticker.seed(last.close);
                }
                self.shared.surface.set_series(state.series.as_slice());
                self.shared.surface.scroll_to_latest();
                info!(pair = %pair, candles = state.series.len(), "snapshot loaded");
                StartOutcome::Loaded(state.series.len())
            }
            Err(e) => {
                warn!(pair = %pair, error = %e, "snapshot fetch failed");
                StartOutcome::SnapshotFailed
            }
        };

        open_stream(&self.shared, state, generation);
        outcome
    }

    /// Forward container size changes to the surface until `stop`.
    /// Replaces any previously attached observer.
    pub fn observe_resize(&self, mut viewport: watch::Receiver<Viewport>) {
        let mut state = self.shared.state.lock();
        state.detach_resize();
        let epoch = state.resize_epoch;

        let shared = Arc::clone(&self.shared);
        state.resize = Some(tokio::spawn(async move {
            loop {
                let size = *viewport.borrow_and_update();
                {
                    let state = shared.state.lock();
                    if state.resize_epoch != epoch {
                        return;
                    }
                    shared.surface.resize(size);
                }
                if viewport.changed().await.is_err() {
                    return;
                }
            }
        }));
    }

    /// Tear down: disarm reconnects, release the stream, cancel the pending
    /// reconnect timer and detach the resize observer. Safe to call twice.
    pub fn stop(&self) {
        let mut state = self.shared.state.lock();
        state.disarm();
        state.detach_resize();
        if let Some(pair) = state.pair.take() {
            info!(pair = %pair, "candle feed stopped");
        }
    }

    pub fn pair(&self) -> Option<TradingPair> {
        self.shared.state.lock().pair.clone()
    }

    pub fn series(&self) -> Vec<Candle> {
        self.shared.state.lock().series.to_vec()
    }

    pub fn ticker(&self) -> PriceTicker {
        self.shared.state.lock().ticker.clone()
    }

    /// True while a streaming connection task is alive.
    pub fn is_streaming(&self) -> bool {
        self.shared
            .state
            .lock()
            .stream
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub fn has_pending_reconnect(&self) -> bool {
        self.shared
            .state
            .lock()
            .reconnect
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl Drop for LiveCandleFeed {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_stream(shared: &Arc<Shared>, state: &mut FeedState, generation: u64) {
    let Some(pair) = state.pair.clone() else {
        return;
    };
    if let Some(previous) = state.stream.take() {
        previous.abort();
    }
    // Called from the reconnect timer itself; its handle is done with.
    state.reconnect = None;
    state.stream = Some(tokio::spawn(run_stream(
        Arc::clone(shared),
        pair,
        generation,
    )));
}

async fn run_stream(shared: Arc<Shared>, pair: TradingPair, generation: u64) {
    match shared.connector.connect(&pair).await {
        Ok(mut messages) => {
            info!(pair = %pair, connector = shared.connector.name(), "kline stream connected");
            while let Some(message) = messages.next().await {
                match message {
                    Ok(text) => {
                        if !apply_message(&shared, generation, &text) {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(pair = %pair, error = %e, "kline stream error");
                        break;
                    }
                }
            }
            info!(pair = %pair, "kline stream closed");
        }
        Err(e) => {
            warn!(pair = %pair, error = %e, "kline stream connect failed");
        }
    }

    schedule_reconnect(&shared, generation);
}

/// Returns false once the feed has moved past `generation`.
fn apply_message(shared: &Shared, generation: u64, text: &str) -> bool {
    let candle = match kline::parse_stream_message(text) {
        Ok(candle) => candle,
        Err(e) => {
            debug!(error = %e, "discarding kline message");
            return true;
        }
    };

    let mut guard = shared.state.lock();
    let state = &mut *guard;
    if state.generation != generation {
        return false;
    }

    let bucket = candle.timestamp;
    if state.series.upsert(candle) == UpsertOutcome::Ignored {
        debug!(%bucket, "ignoring update for a closed bucket");
        return true;
    }

    if let Some(current) = state.series.last() {
        let tick = state.ticker.observe(current.close);
        shared.surface.update_candle(current);
        shared.surface.update_price(&tick);
    }
    true
}

fn schedule_reconnect(shared: &Arc<Shared>, generation: u64) {
    let mut state = shared.state.lock();
    if state.generation != generation {
        return;
    }

    // The finishing stream task owns this handle.
    state.stream = None;

    let delay = shared.config.reconnect_delay;
    info!(delay_ms = delay.as_millis() as u64, "scheduling kline stream reconnect");

    let timer_shared = Arc::clone(shared);
    state.reconnect = Some(tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let mut state = timer_shared.state.lock();
        if state.generation == generation {
            open_stream(&timer_shared, &mut state, generation);
        }
    }));
}
