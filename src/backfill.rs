// =============================================================================
// HistoricalBackfiller — paginated retrieval of a symbol's full history
// =============================================================================
//
// Pages are fetched strictly sequentially (one in flight) to respect feed
// rate limits.  The cursor for each page is the last retrieved open time;
// since the feed's `startTime` is inclusive, the boundary candle comes back
// again on the next page and is dropped before extending the batch.  A page
// shorter than the page size is the only termination signal the feed offers.
//
// Nothing is written here: the caller commits the returned batch in a single
// bulk insert, so a failed or cancelled fetch leaves zero rows behind.
// =============================================================================

use std::sync::Arc;

use tracing::{debug, info};

use crate::context::TrackerContext;
use crate::error::IngestError;
use crate::feed::HistorySource;
use crate::types::{Candle, Symbol, Timeframe};

/// Feed page size. Pages shorter than this terminate the fetch.
pub const PAGE_SIZE: u32 = 1000;

pub struct HistoricalBackfiller {
    source: Arc<dyn HistorySource>,
    timeframe: Timeframe,
}

impl HistoricalBackfiller {
    pub fn new(source: Arc<dyn HistorySource>, timeframe: Timeframe) -> Self {
        Self { source, timeframe }
    }

    /// Fetch every candle for `symbol` from `since` (epoch ms) up to the
    /// feed's present, in ascending open-time order with no duplicates.
    ///
    /// Errors propagate untouched: `Network` means retry later, `Rejected`
    /// means the symbol must not be registered, `Cancelled` means shutdown
    /// was observed after a page completed.
    pub async fn fetch(
        &self,
        symbol: &Symbol,
        since: i64,
        ctx: &TrackerContext,
    ) -> Result<Vec<Candle>, IngestError> {
        let mut candles: Vec<Candle> = Vec::new();
        let mut cursor = since;

        loop {
            if ctx.is_shutdown() {
                return Err(IngestError::Cancelled);
            }

            let page = self
                .source
                .fetch_page(symbol, self.timeframe, cursor, PAGE_SIZE)
                .await?;
            let page_len = page.len();

            // Drop the inclusive-boundary duplicate and anything out of order.
            let last_seen = candles.last().map(|c| c.open_time);
            candles.extend(
                page.into_iter()
                    .filter(|c| last_seen.map_or(true, |t| c.open_time > t)),
            );

            debug!(%symbol, cursor, page_len, total = candles.len(), "backfill page");

            if page_len < PAGE_SIZE as usize {
                break;
            }
            cursor = match candles.last() {
                Some(c) => c.open_time,
                // A full page that deduplicated to nothing cannot advance
                // the cursor; stop rather than loop forever.
                None => break,
            };
        }

        info!(%symbol, since, count = candles.len(), "backfill fetch complete");
        Ok(candles)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeHistory, RejectAllHistory};

    #[tokio::test]
    async fn fetches_full_pages_then_short_page() {
        // 2 full pages of 1000 plus one page of 400.
        let history = Arc::new(FakeHistory::new(0, 2400));
        let backfiller = HistoricalBackfiller::new(history.clone(), Timeframe::M1);
        let ctx = TrackerContext::new();

        let candles = backfiller
            .fetch(&Symbol::from_canonical("BTCUSDT"), 0, &ctx)
            .await
            .unwrap();

        assert_eq!(candles.len(), 2400);
        // Inclusive cursor re-serves the boundary candle on each follow-up
        // page: 1000, then 1000 (999 new), then the 402-row tail ends the
        // loop.
        assert_eq!(history.fetches(), 3);

        // Strictly increasing, gap-free minute series.
        for (i, c) in candles.iter().enumerate() {
            assert_eq!(c.open_time, i as i64 * 60_000);
        }
    }

    #[tokio::test]
    async fn short_first_page_terminates_immediately() {
        let history = Arc::new(FakeHistory::new(1_000_000, 400));
        let backfiller = HistoricalBackfiller::new(history.clone(), Timeframe::M1);
        let ctx = TrackerContext::new();

        let candles = backfiller
            .fetch(&Symbol::from_canonical("ETHUSDT"), 0, &ctx)
            .await
            .unwrap();

        assert_eq!(candles.len(), 400);
        assert_eq!(history.fetches(), 1);
    }

    #[tokio::test]
    async fn unknown_symbol_aborts_with_typed_error() {
        let backfiller = HistoricalBackfiller::new(Arc::new(RejectAllHistory), Timeframe::M1);
        let ctx = TrackerContext::new();
        let foo = Symbol::from_canonical("FOOUSDT");

        let err = backfiller.fetch(&foo, 0, &ctx).await.unwrap_err();
        match err {
            IngestError::Rejected { symbol, .. } => assert_eq!(symbol, foo),
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn shutdown_aborts_before_first_page() {
        let history = Arc::new(FakeHistory::new(0, 5000));
        let backfiller = HistoricalBackfiller::new(history.clone(), Timeframe::M1);
        let ctx = TrackerContext::new();
        ctx.trigger_shutdown();

        let err = backfiller
            .fetch(&Symbol::from_canonical("BTCUSDT"), 0, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Cancelled));
        assert_eq!(history.fetches(), 0);
    }
}
