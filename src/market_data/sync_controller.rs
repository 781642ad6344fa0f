//! Per-symbol lifecycle: open the feed, fetch a snapshot while buffering the
//! stream, anchor the sequencer, then apply diffs until continuity breaks or
//! the transport drops, and start over.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, instrument, warn};

use crate::engine::analytics::AnalyticsView;
use crate::engine::book::OrderBookStore;
use crate::engine::types::{AnalyticsError, LevelChange, TopLevels};
use crate::market_data::adapters::{FeedMessage, FeedStream, FeedTransport, SnapshotProvider};
use crate::market_data::adapters::binance::depth_stream_key;
use crate::market_data::normaliser::Normaliser;
use crate::market_data::retry::RetryPolicy;
use crate::market_data::sequencer::EventSequencer;
use crate::market_data::types::{
    DiffEvent, NormaliseError, SequenceGap, Snapshot, SyncError, WireDepthUpdate,
};

pub type SharedBook = Arc<RwLock<OrderBookStore>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    FetchingSnapshot,
    Streaming,
    Resyncing,
    Failed,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResyncReason {
    SequenceGap(SequenceGap),
    TransportClosed,
    TransportError(String),
    StreamEnded,
    StaleSnapshot,
    StaleFeed(Duration),
}

impl ResyncReason {
    pub fn label(&self) -> &'static str {
        match self {
            ResyncReason::SequenceGap(_) => "sequence_gap",
            ResyncReason::TransportClosed => "transport_closed",
            ResyncReason::TransportError(_) => "transport_error",
            ResyncReason::StreamEnded => "stream_ended",
            ResyncReason::StaleSnapshot => "stale_snapshot",
            ResyncReason::StaleFeed(_) => "stale_feed",
        }
    }
}

/// Why a streaming session stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    Shutdown,
    Resync(ResyncReason),
}

/// Result of `start`: either a live, anchored feed or the reason it never got there.
pub enum Started {
    Streaming(FeedStream),
    Interrupted(SessionEnd),
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub symbol: String,
    pub stream_key: String,
    pub normaliser: Normaliser,
    pub snapshot_retry: RetryPolicy,
    pub connect_retry: RetryPolicy,
    pub reconnect_delay: Duration,
    // Resync when the feed is silent this long while streaming. Zero disables.
    pub stale_timeout: Duration,
}

impl ControllerConfig {
    pub fn new(symbol: &str, normaliser: Normaliser) -> Self {
        Self {
            symbol: symbol.to_string(),
            stream_key: depth_stream_key(symbol),
            normaliser,
            snapshot_retry: RetryPolicy::default(),
            connect_retry: RetryPolicy::default(),
            reconnect_delay: Duration::from_secs(1),
            stale_timeout: Duration::from_secs(30),
        }
    }
}

/// Consumer side of a running controller.
#[derive(Clone)]
pub struct SyncHandle {
    book: SharedBook,
    state: watch::Receiver<ControllerState>,
    shutdown: Arc<watch::Sender<bool>>,
    price_scale: i64,
}

impl SyncHandle {
    pub fn book(&self) -> &SharedBook {
        &self.book
    }

    pub fn state(&self) -> ControllerState {
        *self.state.borrow()
    }

    /// Resolves on every state transition.
    pub fn state_changes(&self) -> watch::Receiver<ControllerState> {
        self.state.clone()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<LevelChange> {
        self.book.write().subscribe()
    }

    pub fn top_levels(&self, n: usize) -> TopLevels {
        self.book.read().top_levels(n)
    }

    pub fn book_pressure(&self, n: usize) -> Result<f64, AnalyticsError> {
        let book = self.book.read();
        AnalyticsView::new(&book, self.price_scale).book_pressure(n)
    }

    /// Stop the controller. No message is applied after it observes this.
    pub fn close(&self) {
        self.shutdown.send_replace(true);
    }
}

// Snapshot side: provider + retry policy
struct SnapshotFetcher<P> {
    provider: P,
    symbol: String,
    retry: RetryPolicy,
}

impl<P: SnapshotProvider> SnapshotFetcher<P> {
    async fn fetch(&self) -> Result<Snapshot, SyncError> {
        let provider = &self.provider;
        let symbol = self.symbol.as_str();
        self.retry
            .run("snapshot", move || provider.fetch(symbol))
            .await
            .map_err(|(attempts, source)| SyncError::SnapshotFetch { symbol: self.symbol.clone(), attempts, source })
    }
}

// Stream side: message filtering, decoding and sequencing into the book
struct Pipeline {
    stream_key: String,
    normaliser: Normaliser,
    sequencer: EventSequencer,
    book: SharedBook,
}

impl Pipeline {
    fn decode(&self, payload: serde_json::Value) -> Result<DiffEvent, NormaliseError> {
        let wire: WireDepthUpdate =
            serde_json::from_value(payload).map_err(|e| NormaliseError::Payload(e.to_string()))?;
        self.normaliser.diff_event(&wire)
    }

    fn handle(&mut self, msg: FeedMessage) -> Option<ResyncReason> {
        match msg {
            FeedMessage::Opened => {
                info!(stream = %self.stream_key, "Feed opened");
                None
            }
            FeedMessage::Closed => Some(ResyncReason::TransportClosed),
            FeedMessage::Error(e) => {
                warn!(error = %e, "Feed error");
                Some(ResyncReason::TransportError(e))
            }
            FeedMessage::Message { stream, payload } => {
                if stream != self.stream_key {
                    debug!(%stream, "Ignoring message for another stream");
                    return None;
                }
                let event = match self.decode(payload) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "Dropping malformed depth event");
                        metrics::counter!("depthsync_malformed_events_total").increment(1);
                        return None;
                    }
                };

                let mut book = self.book.write();
                match self.sequencer.ingest(event, &mut book) {
                    Ok(_) if self.sequencer.is_behind_stream() => Some(ResyncReason::StaleSnapshot),
                    Ok(_) => None,
                    Err(gap) => Some(ResyncReason::SequenceGap(gap)),
                }
            }
        }
    }

    // Load the snapshot and anchor under one write lock so readers never see
    // the snapshot without the buffered events that bridge it.
    fn anchor(&mut self, snapshot: &Snapshot) -> usize {
        let mut book = self.book.write();
        book.load_snapshot(&snapshot.bids, &snapshot.asks);
        self.sequencer.set_anchor(snapshot.last_update_id, &mut book)
    }

    fn reset(&mut self) {
        self.book.write().clear();
        self.sequencer.reset();
    }
}

pub struct SyncController<P, T> {
    fetcher: SnapshotFetcher<P>,
    transport: T,
    pipeline: Pipeline,
    connect_retry: RetryPolicy,
    reconnect_delay: Duration,
    stale_timeout: Duration,
    state_tx: watch::Sender<ControllerState>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<P, T> SyncController<P, T>
where
    P: SnapshotProvider,
    T: FeedTransport,
{
    pub fn new(config: ControllerConfig, provider: P, transport: T) -> (Self, SyncHandle) {
        let book: SharedBook = Arc::new(RwLock::new(OrderBookStore::new()));
        let (state_tx, state_rx) = watch::channel(ControllerState::Idle);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = SyncHandle {
            book: Arc::clone(&book),
            state: state_rx,
            shutdown: Arc::new(shutdown_tx),
            price_scale: config.normaliser.price_scale,
        };
        let controller = Self {
            fetcher: SnapshotFetcher { provider, symbol: config.symbol, retry: config.snapshot_retry },
            transport,
            pipeline: Pipeline {
                stream_key: config.stream_key,
                normaliser: config.normaliser,
                sequencer: EventSequencer::new(),
                book,
            },
            connect_retry: config.connect_retry,
            reconnect_delay: config.reconnect_delay,
            stale_timeout: config.stale_timeout,
            state_tx,
            shutdown_rx,
        };
        (controller, handle)
    }

    pub fn state(&self) -> ControllerState {
        *self.state_tx.borrow()
    }

    pub fn sequencer(&self) -> &EventSequencer {
        &self.pipeline.sequencer
    }

    fn set_state(&self, state: ControllerState) {
        let prev = self.state_tx.send_replace(state);
        if prev != state {
            debug!(from = ?prev, to = ?state, "Controller state");
        }
    }

    fn shutdown_now(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Drive the symbol until `close()` is called (Ok) or a snapshot/connection
    /// failure outlasts its retry budget (Err). The feed is released on return.
    #[instrument(skip(self), fields(symbol = %self.fetcher.symbol))]
    pub async fn run(mut self) -> Result<(), SyncError> {
        loop {
            let end = match self.start().await {
                Ok(Started::Streaming(feed)) => self.stream(feed).await,
                Ok(Started::Interrupted(end)) => end,
                Err(e) => {
                    error!(error = %e, "Giving up on symbol");
                    self.set_state(ControllerState::Failed);
                    return Err(e);
                }
            };

            match end {
                SessionEnd::Shutdown => {
                    info!("Controller closed");
                    self.set_state(ControllerState::Closed);
                    return Ok(());
                }
                SessionEnd::Resync(reason) => self.resync(reason).await,
            }
        }
    }

    /// Open the feed and fetch the snapshot concurrently. Messages that arrive
    /// while the fetch is outstanding are buffered by the sequencer and
    /// replayed against the snapshot once it lands.
    pub async fn start(&mut self) -> Result<Started, SyncError> {
        if self.shutdown_now() {
            return Ok(Started::Interrupted(SessionEnd::Shutdown));
        }
        self.set_state(ControllerState::FetchingSnapshot);
        self.pipeline.sequencer.reset();

        let opened = tokio::select! {
            biased;
            () = shutdown_requested(&mut self.shutdown_rx) => {
                return Ok(Started::Interrupted(SessionEnd::Shutdown));
            }
            res = open_feed(&self.transport, &self.connect_retry, &self.pipeline.stream_key) => res,
        };
        let mut feed = opened?;

        let snapshot = {
            let fetch = self.fetcher.fetch();
            tokio::pin!(fetch);
            loop {
                tokio::select! {
                    biased;
                    () = shutdown_requested(&mut self.shutdown_rx) => {
                        return Ok(Started::Interrupted(SessionEnd::Shutdown));
                    }
                    res = &mut fetch => break res?,
                    msg = feed.next() => {
                        let Some(msg) = msg else {
                            return Ok(Started::Interrupted(SessionEnd::Resync(ResyncReason::StreamEnded)));
                        };
                        if let Some(reason) = self.pipeline.handle(msg) {
                            return Ok(Started::Interrupted(SessionEnd::Resync(reason)));
                        }
                    }
                }
            }
        };

        let buffered = self.pipeline.sequencer.pending_len();
        let applied = self.pipeline.anchor(&snapshot);
        info!(
            last_update_id = snapshot.last_update_id,
            buffered,
            applied,
            "Snapshot loaded"
        );
        if self.pipeline.sequencer.is_behind_stream() {
            return Ok(Started::Interrupted(SessionEnd::Resync(ResyncReason::StaleSnapshot)));
        }

        self.set_state(ControllerState::Streaming);
        Ok(Started::Streaming(feed))
    }

    async fn stream(&mut self, mut feed: FeedStream) -> SessionEnd {
        loop {
            tokio::select! {
                biased;
                () = shutdown_requested(&mut self.shutdown_rx) => return SessionEnd::Shutdown,
                msg = next_within(&mut feed, self.stale_timeout) => {
                    let msg = match msg {
                        Ok(Some(msg)) => msg,
                        Ok(None) => return SessionEnd::Resync(ResyncReason::StreamEnded),
                        Err(_) => return SessionEnd::Resync(ResyncReason::StaleFeed(self.stale_timeout)),
                    };
                    if let Some(reason) = self.pipeline.handle(msg) {
                        return SessionEnd::Resync(reason);
                    }
                }
            }
        }
    }

    async fn resync(&mut self, reason: ResyncReason) {
        warn!(reason = reason.label(), detail = ?reason, "Resyncing order book");
        metrics::counter!("depthsync_resyncs_total", "reason" => reason.label()).increment(1);
        self.set_state(ControllerState::Resyncing);
        self.pipeline.reset();

        if !self.reconnect_delay.is_zero() {
            tokio::select! {
                () = shutdown_requested(&mut self.shutdown_rx) => {}
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }
    }
}

async fn open_feed<T: FeedTransport>(
    transport: &T,
    retry: &RetryPolicy,
    stream_key: &str,
) -> Result<FeedStream, SyncError> {
    retry
        .run("connect", move || transport.open(stream_key))
        .await
        .map_err(|(attempts, source)| SyncError::Transport { stream: stream_key.to_string(), attempts, source })
}

async fn next_within(
    feed: &mut FeedStream,
    limit: Duration,
) -> Result<Option<FeedMessage>, tokio::time::error::Elapsed> {
    if limit.is_zero() {
        return Ok(feed.next().await);
    }
    tokio::time::timeout(limit, feed.next()).await
}

// Resolves once shutdown is requested or every handle is gone.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
