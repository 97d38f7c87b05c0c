// =============================================================================
// Test fixtures — scripted feed implementations shared across test modules
// =============================================================================

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::context::TrackerContext;
use crate::error::IngestError;
use crate::feed::{CandleBatch, CandleStream, HistorySource, LiveFeed};
use crate::types::{Candle, Symbol, Timeframe};

pub fn candle(open_time: i64, close: f64) -> Candle {
    Candle {
        open_time,
        open: close - 0.5,
        high: close + 1.0,
        low: close - 1.0,
        close,
        volume: 10.0,
    }
}

// =============================================================================
// FakeHistory — contiguous scripted kline history
// =============================================================================

/// Serves a contiguous series of `total` candles starting at `t0`, spaced by
/// the requested timeframe, honouring the feed's inclusive `since` semantics.
pub struct FakeHistory {
    t0: i64,
    total: usize,
    pages_served: AtomicU32,
}

impl FakeHistory {
    pub fn new(t0: i64, total: usize) -> Self {
        Self {
            t0,
            total,
            pages_served: AtomicU32::new(0),
        }
    }

    /// Number of `fetch_page` calls served so far.
    pub fn fetches(&self) -> u32 {
        self.pages_served.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HistorySource for FakeHistory {
    async fn fetch_page(
        &self,
        _symbol: &Symbol,
        timeframe: Timeframe,
        since: i64,
        limit: u32,
    ) -> Result<Vec<Candle>, IngestError> {
        self.pages_served.fetch_add(1, Ordering::SeqCst);
        let step = timeframe.duration_ms();
        Ok((0..self.total)
            .map(|i| self.t0 + i as i64 * step)
            .filter(|t| *t >= since)
            .take(limit as usize)
            .map(|t| candle(t, 100.0))
            .collect())
    }
}

/// A feed that rejects every symbol, as Binance does for unknown pairs.
pub struct RejectAllHistory;

#[async_trait]
impl HistorySource for RejectAllHistory {
    async fn fetch_page(
        &self,
        symbol: &Symbol,
        _timeframe: Timeframe,
        _since: i64,
        _limit: u32,
    ) -> Result<Vec<Candle>, IngestError> {
        Err(IngestError::Rejected {
            symbol: symbol.clone(),
            reason: "Invalid symbol.".into(),
        })
    }
}

// =============================================================================
// ScriptedFeed — scripted live subscriptions for ingest-loop tests
// =============================================================================

pub enum FeedEvent {
    /// Deliver a message batch.
    Batch(CandleBatch),
    /// Fail the read with this error.
    Fail(IngestError),
    /// Hold the read open for this long before the next event.
    Sleep(std::time::Duration),
    /// End the stream cleanly.
    End,
}

/// Hands out one scripted stream per `subscribe` call, recording the symbol
/// set of every subscription.  When the script runs dry it triggers shutdown
/// on the shared context so `StreamIngestor::run` terminates.
pub struct ScriptedFeed {
    scripts: Mutex<VecDeque<Vec<FeedEvent>>>,
    ctx: Arc<TrackerContext>,
    subscriptions: Mutex<Vec<Vec<Symbol>>>,
}

impl ScriptedFeed {
    pub fn new(ctx: Arc<TrackerContext>, scripts: Vec<Vec<FeedEvent>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            ctx,
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Symbol sets passed to `subscribe`, in call order.
    pub fn subscriptions(&self) -> Vec<Vec<Symbol>> {
        self.subscriptions.lock().clone()
    }
}

#[async_trait]
impl LiveFeed for ScriptedFeed {
    async fn subscribe(
        &self,
        symbols: &[Symbol],
        _timeframe: Timeframe,
    ) -> Result<Box<dyn CandleStream>, IngestError> {
        self.subscriptions.lock().push(symbols.to_vec());
        match self.scripts.lock().pop_front() {
            Some(events) => Ok(Box::new(ScriptedStream {
                events: events.into(),
                ctx: self.ctx.clone(),
            })),
            None => {
                self.ctx.trigger_shutdown();
                Err(IngestError::Network("script exhausted".into()))
            }
        }
    }
}

pub struct ScriptedStream {
    events: VecDeque<FeedEvent>,
    ctx: Arc<TrackerContext>,
}

#[async_trait]
impl CandleStream for ScriptedStream {
    async fn next_batch(&mut self) -> Result<Option<CandleBatch>, IngestError> {
        loop {
            match self.events.pop_front() {
                Some(FeedEvent::Batch(batch)) => return Ok(Some(batch)),
                Some(FeedEvent::Fail(err)) => return Err(err),
                Some(FeedEvent::Sleep(d)) => {
                    tokio::time::sleep(d).await;
                    continue;
                }
                Some(FeedEvent::End) => return Ok(None),
                None => {
                    // Script exhausted mid-stream: stop the world so the
                    // test returns instead of blocking forever.
                    self.ctx.trigger_shutdown();
                    return Ok(None);
                }
            }
        }
    }

    async fn close(&mut self) {}
}
