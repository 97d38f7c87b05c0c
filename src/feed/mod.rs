// =============================================================================
// Market-data feed — REST history pages and the live kline WebSocket
// =============================================================================
//
// The two capabilities the core consumes are expressed as traits so the
// backfiller and the ingest loop can run against scripted feeds in tests.
// `FeedClient` implements both against Binance.
// =============================================================================

pub mod client;
pub mod stream;

pub use client::FeedClient;

use async_trait::async_trait;

use crate::error::IngestError;
use crate::types::{Candle, Symbol, Timeframe};

/// One inbound message batch: the latest (possibly still-open) candle for
/// each symbol that updated.
pub type CandleBatch = Vec<(Symbol, Candle)>;

/// Paginated historical candle retrieval.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Fetch one page of candles with `open_time >= since`, ascending,
    /// at most `limit` rows. There is no explicit "has more" signal; a
    /// short page is the only termination cue.
    async fn fetch_page(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        since: i64,
        limit: u32,
    ) -> Result<Vec<Candle>, IngestError>;
}

/// An open multiplexed live-candle subscription.
#[async_trait]
pub trait CandleStream: Send {
    /// Await the next message batch. `Ok(None)` means the stream ended
    /// cleanly and the caller should resubscribe.
    async fn next_batch(&mut self) -> Result<Option<CandleBatch>, IngestError>;

    /// Release the underlying connection.
    async fn close(&mut self);
}

/// Live-candle subscription factory.
#[async_trait]
pub trait LiveFeed: Send + Sync {
    async fn subscribe(
        &self,
        symbols: &[Symbol],
        timeframe: Timeframe,
    ) -> Result<Box<dyn CandleStream>, IngestError>;
}
