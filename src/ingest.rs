// =============================================================================
// StreamIngestor — live candle ingestion with inferred close detection
// =============================================================================
//
// One sequential loop per process. The feed never says "this candle closed";
// the only reliable cue is a strictly later open time arriving for the same
// symbol, at which point the previously observed value can no longer change
// and is persisted exactly once.
//
// States:
//   Idle        no symbols tracked; poll the snapshot every few seconds
//   Subscribed  one multiplexed subscription opened against snapshot version V;
//               between message batches the live version is compared to V and
//               the subscription is reopened when they differ (a symbol change
//               therefore takes effect at the next batch boundary, an accepted
//               latency trade-off)
//   Recovering  a feed error occurred; LastObserved state is kept, the error
//               is logged, and the subscription is reopened after a short
//               delay.  A typed symbol rejection additionally removes the
//               offending symbol from tracking before retrying.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::context::TrackerContext;
use crate::error::IngestError;
use crate::feed::{CandleBatch, CandleStream, LiveFeed};
use crate::lifecycle::SymbolLifecycleManager;
use crate::storage::CandleStore;
use crate::types::{Candle, Symbol, Timeframe, TrackedSnapshot};

pub struct StreamIngestor {
    feed: Arc<dyn LiveFeed>,
    store: CandleStore,
    lifecycle: Arc<SymbolLifecycleManager>,
    ctx: Arc<TrackerContext>,
    timeframe: Timeframe,
    idle_poll: Duration,
    reconnect_delay: Duration,
    /// Most recent (possibly still-open) candle per symbol. In-memory only;
    /// survives reconnects so no close is double-counted across them.
    last_observed: HashMap<Symbol, Candle>,
}

impl StreamIngestor {
    pub fn new(
        feed: Arc<dyn LiveFeed>,
        store: CandleStore,
        lifecycle: Arc<SymbolLifecycleManager>,
        ctx: Arc<TrackerContext>,
        timeframe: Timeframe,
        idle_poll: Duration,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            feed,
            store,
            lifecycle,
            ctx,
            timeframe,
            idle_poll,
            reconnect_delay,
            last_observed: HashMap::new(),
        }
    }

    /// Run until the shared shutdown signal fires. Feed errors never
    /// terminate the loop; they only cycle it through `Recovering`.
    pub async fn run(mut self) {
        info!("stream ingestor started");

        while !self.ctx.is_shutdown() {
            let snap = self.ctx.snapshot();

            if snap.is_empty() {
                // Idle: nothing to subscribe to.
                tokio::select! {
                    _ = self.ctx.cancelled() => break,
                    _ = tokio::time::sleep(self.idle_poll) => continue,
                }
            }

            let feed = self.feed.clone();
            match feed.subscribe(&snap.symbols, self.timeframe).await {
                Ok(stream) => self.pump(stream, &snap).await,
                Err(e) => {
                    self.handle_feed_error(e).await;
                    self.recovery_pause().await;
                }
            }
        }

        info!("stream ingestor stopped");
    }

    /// Drain one open subscription until shutdown, snapshot staleness, clean
    /// stream end, or a feed error.
    async fn pump(&mut self, mut stream: Box<dyn CandleStream>, snap: &TrackedSnapshot) {
        loop {
            if self.ctx.is_shutdown() {
                stream.close().await;
                return;
            }

            // Resubscribe check, once per message batch.
            let live = self.ctx.snapshot();
            if live.version != snap.version {
                info!(
                    subscribed = snap.version,
                    live = live.version,
                    "tracked snapshot changed, resubscribing"
                );
                self.last_observed.retain(|sym, _| live.contains(sym));
                stream.close().await;
                return;
            }

            tokio::select! {
                _ = self.ctx.cancelled() => {
                    stream.close().await;
                    return;
                }
                batch = stream.next_batch() => match batch {
                    Ok(Some(batch)) => self.process_batch(snap, batch).await,
                    Ok(None) => {
                        warn!("kline stream ended, resubscribing");
                        stream.close().await;
                        return;
                    }
                    Err(e) => {
                        stream.close().await;
                        self.handle_feed_error(e).await;
                        self.recovery_pause().await;
                        return;
                    }
                }
            }
        }
    }

    /// Apply one inbound batch to `LastObserved`, persisting each candle
    /// whose finality a strictly later timestamp just proved.
    async fn process_batch(&mut self, snap: &TrackedSnapshot, batch: CandleBatch) {
        for (symbol, incoming) in batch {
            if !snap.contains(&symbol) {
                debug!(%symbol, "dropping update for untracked symbol");
                continue;
            }

            match self.last_observed.get(&symbol) {
                Some(prev) if incoming.open_time > prev.open_time => {
                    // The previous value can no longer change: persist it
                    // exactly once, then start observing the new bucket.
                    let closed = prev.clone();
                    self.persist_closed(&symbol, &closed).await;
                    self.last_observed.insert(symbol, incoming);
                }
                Some(prev) if incoming.open_time < prev.open_time => {
                    warn!(
                        %symbol,
                        incoming = incoming.open_time,
                        observed = prev.open_time,
                        "out-of-order candle dropped"
                    );
                }
                // Same bucket still forming, or first sighting of the symbol.
                _ => {
                    self.last_observed.insert(symbol, incoming);
                }
            }
        }
    }

    async fn persist_closed(&self, symbol: &Symbol, candle: &Candle) {
        match self.store.insert_one(symbol, candle).await {
            Ok(()) => {
                debug!(%symbol, open_time = candle.open_time, close = candle.close, "closed candle persisted");
            }
            Err(IngestError::Integrity { open_time, .. }) => {
                // Usually the backfill already captured this bucket (the
                // REST history includes the then-open candle). Skip the
                // record, never the batch.
                warn!(%symbol, open_time, "duplicate closed candle skipped");
            }
            Err(e) => {
                error!(%symbol, error = %e, "failed to persist closed candle");
            }
        }
    }

    /// Classify a feed error and take corrective action. Transient errors
    /// are only logged; a typed symbol rejection removes the symbol from
    /// tracking so the next subscription is clean.
    async fn handle_feed_error(&mut self, err: IngestError) {
        match err {
            IngestError::Rejected { symbol, reason } => {
                warn!(%symbol, %reason, "feed rejected symbol, removing from tracking");
                self.last_observed.remove(&symbol);
                match self.lifecycle.remove(symbol.as_str()).await {
                    Ok(true) => info!(%symbol, "symbol removed after feed rejection"),
                    Ok(false) => debug!(%symbol, "symbol was already untracked"),
                    Err(e) => error!(%symbol, error = %e, "failed to remove rejected symbol"),
                }
            }
            e => {
                error!(error = %e, "feed error, retrying subscription");
            }
        }
    }

    async fn recovery_pause(&self) {
        tokio::select! {
            _ = self.ctx.cancelled() => {}
            _ = tokio::time::sleep(self.reconnect_delay) => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
