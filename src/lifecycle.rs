// =============================================================================
// SymbolLifecycleManager — orchestrates symbol add/remove and snapshot publish
// =============================================================================
//
// add: normalize → backfill → commit batch → register → publish snapshot.
// The registry row is written only after the backfill committed, so a tracked
// symbol always has contiguous history behind it.
//
// remove: delete candles → delete registry row → publish snapshot.  Candles
// go first so a crash between the steps leaves a registered symbol with no
// rows, not orphaned rows with no owner; both deletes are idempotent, so a
// retried remove finishes the job.
//
// Registry mutations are serialized by an async mutex so concurrent add and
// remove calls from request handlers converge to set semantics regardless of
// interleaving.
// =============================================================================

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::backfill::HistoricalBackfiller;
use crate::context::TrackerContext;
use crate::error::IngestError;
use crate::storage::{CandleStore, SymbolRegistry};
use crate::types::{Symbol, Timeframe};

pub struct SymbolLifecycleManager {
    registry: SymbolRegistry,
    candles: CandleStore,
    backfiller: HistoricalBackfiller,
    ctx: Arc<TrackerContext>,
    quote_currency: String,
    timeframe: Timeframe,
    history_start_ms: i64,
    /// Serializes add/remove so snapshot publication matches the registry.
    mutate: Mutex<()>,
}

impl SymbolLifecycleManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: SymbolRegistry,
        candles: CandleStore,
        backfiller: HistoricalBackfiller,
        ctx: Arc<TrackerContext>,
        quote_currency: impl Into<String>,
        timeframe: Timeframe,
        history_start_ms: i64,
    ) -> Self {
        Self {
            registry,
            candles,
            backfiller,
            ctx,
            quote_currency: quote_currency.into(),
            timeframe,
            history_start_ms,
            mutate: Mutex::new(()),
        }
    }

    /// Track a new symbol: backfill full history, commit it in one bulk
    /// insert, register the symbol and publish a fresh snapshot.
    ///
    /// Returns `Ok(false)` when the symbol is already tracked or the feed
    /// rejected it; transient failures propagate so the caller can retry.
    pub async fn add(&self, raw: &str) -> Result<bool, IngestError> {
        let symbol = Symbol::normalize(raw, &self.quote_currency)?;
        let _guard = self.mutate.lock().await;

        if self.registry.contains(&symbol).await? {
            info!(%symbol, "symbol already tracked");
            return Ok(false);
        }

        let history = match self
            .backfiller
            .fetch(&symbol, self.history_start_ms, &self.ctx)
            .await
        {
            Ok(history) => history,
            Err(IngestError::Rejected { symbol, reason }) => {
                // Do not register: an orphan tracked symbol with no data
                // would poison every later subscription.
                warn!(%symbol, %reason, "feed rejected symbol, not registering");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        self.candles.insert_batch(&symbol, &history).await?;
        self.registry.add(&symbol).await?;
        self.publish_from_registry().await?;

        info!(%symbol, rows = history.len(), "symbol added");
        Ok(true)
    }

    /// Stop tracking a symbol, cascading to its candle rows. Returns
    /// `Ok(false)` when the symbol was not tracked.
    pub async fn remove(&self, raw: &str) -> Result<bool, IngestError> {
        let symbol = Symbol::normalize(raw, &self.quote_currency)?;
        let _guard = self.mutate.lock().await;

        if !self.registry.contains(&symbol).await? {
            info!(%symbol, "symbol not tracked");
            return Ok(false);
        }

        let deleted = self.candles.delete_symbol(&symbol).await?;
        self.registry.remove(&symbol).await?;
        self.publish_from_registry().await?;

        info!(%symbol, deleted, "symbol removed");
        Ok(true)
    }

    /// Ordered `"{pair}@{timeframe}"` list derived from the live snapshot,
    /// independent of the ingestor's connection state.
    pub fn status(&self) -> Vec<String> {
        self.ctx
            .snapshot()
            .symbols
            .iter()
            .map(|s| format!("{s}@{}", self.timeframe))
            .collect()
    }

    /// Re-read the registry and publish a fresh tracked snapshot. Called at
    /// boot to recover prior membership and after every mutation.
    pub async fn publish_from_registry(&self) -> Result<u64, IngestError> {
        let symbols = self.registry.list().await?;
        Ok(self.ctx.publish(symbols))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
