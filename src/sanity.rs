// =============================================================================
// Freshness watchdog — flags tracked symbols whose data has gone stale
// =============================================================================
//
// The ingest loop self-heals most feed problems, but a subscription that is
// silently not delivering (half-open connection, feed-side drop) produces no
// error to react to.  This loop checks each tracked symbol's newest persisted
// candle once a minute and logs an error when it falls behind the staleness
// threshold, pointing operators at the subscription.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::context::TrackerContext;
use crate::storage::CandleStore;

const CHECK_INTERVAL: Duration = Duration::from_secs(60);

pub async fn run_freshness_watchdog(
    ctx: Arc<TrackerContext>,
    store: CandleStore,
    staleness_minutes: i64,
) {
    info!(staleness_minutes, "freshness watchdog started");
    let staleness_ms = staleness_minutes * 60_000;

    loop {
        tokio::select! {
            _ = ctx.cancelled() => break,
            _ = tokio::time::sleep(CHECK_INTERVAL) => {}
        }

        let now_ms = Utc::now().timestamp_millis();
        for symbol in &ctx.snapshot().symbols {
            match store.latest(symbol).await {
                Ok(Some(candle)) => {
                    let age_ms = now_ms - candle.open_time;
                    if age_ms > staleness_ms {
                        error!(
                            %symbol,
                            age_minutes = age_ms / 60_000,
                            last_open_time = candle.open_time,
                            "stale data, check the websocket subscription"
                        );
                    }
                }
                Ok(None) => {
                    warn!(%symbol, "no data persisted yet, waiting for first close");
                }
                Err(e) => {
                    error!(%symbol, error = %e, "freshness check failed");
                }
            }
        }
    }

    info!("freshness watchdog stopped");
}
