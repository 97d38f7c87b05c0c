// =============================================================================
// Aurora Candle Feed — Main Entry Point
// =============================================================================
//
// Ingests live kline streams for a dynamic set of spot symbols, persists every
// closed candle exactly once, and backfills full history whenever a symbol is
// added through the REST API. Tracked membership survives restarts via the
// symbol registry.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod backfill;
mod config;
mod context;
mod error;
mod feed;
mod ingest;
mod lifecycle;
mod sanity;
mod storage;
#[cfg(test)]
mod testutil;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::ApiState;
use crate::backfill::HistoricalBackfiller;
use crate::config::RuntimeConfig;
use crate::context::TrackerContext;
use crate::feed::client::FeedClient;
use crate::feed::HistorySource;
use crate::ingest::StreamIngestor;
use crate::lifecycle::SymbolLifecycleManager;
use crate::storage::{CandleStore, SymbolRegistry};

const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(300);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Aurora Candle Feed — Starting Up                 ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config = RuntimeConfig::load("feed_config.json");
    config.validate()?;
    let timeframe = config.parsed_timeframe()?;
    let history_start_ms = config.history_start_ms()?;

    info!(
        quote = %config.quote_currency,
        timeframe = %timeframe,
        database = %config.database_url,
        "Configuration validated"
    );

    // ── 2. Storage ───────────────────────────────────────────────────────
    ensure_sqlite_dir(&config.database_url);
    let pool = storage::connect(&config.database_url).await?;
    let registry = SymbolRegistry::new(pool.clone());
    let store = CandleStore::new(pool.clone());

    // ── 3. Shared tracker state & feed client ────────────────────────────
    let ctx = Arc::new(TrackerContext::new());
    let client = Arc::new(FeedClient::new(
        config.rest_base_url.clone(),
        config.ws_base_url.clone(),
    ));

    let backfiller = HistoricalBackfiller::new(
        client.clone() as Arc<dyn HistorySource>,
        timeframe,
    );
    let lifecycle = Arc::new(SymbolLifecycleManager::new(
        registry.clone(),
        store.clone(),
        backfiller,
        ctx.clone(),
        config.quote_currency.clone(),
        timeframe,
        history_start_ms,
    ));

    // Recover tracked membership from the registry before anything streams.
    let recovered = lifecycle.publish_from_registry().await?;
    info!(
        symbols = ?lifecycle.status(),
        snapshot_version = recovered,
        "Tracked symbols restored from registry"
    );

    // ── 4. Stream ingestor ───────────────────────────────────────────────
    let ingestor = StreamIngestor::new(
        client.clone(),
        store.clone(),
        lifecycle.clone(),
        ctx.clone(),
        timeframe,
        Duration::from_secs(config.idle_poll_secs),
        Duration::from_secs(config.reconnect_delay_secs),
    );
    let ingest_handle = tokio::spawn(ingestor.run());

    // ── 5. Housekeeping loop ─────────────────────────────────────────────
    if config.retention_minutes > 0 {
        let hk_store = store.clone();
        let hk_ctx = ctx.clone();
        let retention_ms = config.retention_minutes as i64 * 60_000;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = hk_ctx.cancelled() => break,
                    _ = tokio::time::sleep(HOUSEKEEPING_INTERVAL) => {}
                }
                let cutoff = chrono::Utc::now().timestamp_millis() - retention_ms;
                match hk_store.delete_older_than(cutoff).await {
                    Ok(0) => {}
                    Ok(n) => info!(deleted = n, cutoff, "housekeeping pruned old candles"),
                    Err(e) => error!(error = %e, "housekeeping sweep failed"),
                }
            }
        });
    } else {
        info!("retention disabled, housekeeping loop not started");
    }

    // ── 6. Freshness watchdog ────────────────────────────────────────────
    tokio::spawn(sanity::run_freshness_watchdog(
        ctx.clone(),
        store.clone(),
        config.staleness_minutes,
    ));

    // ── 7. API server ────────────────────────────────────────────────────
    let api_state = ApiState {
        lifecycle: lifecycle.clone(),
        store: store.clone(),
        quote_currency: config.quote_currency.clone(),
    };
    let bind_addr = config.bind_addr.clone();
    tokio::spawn(async move {
        let app = api::router(api_state);
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .expect("Failed to bind API server");
        info!(addr = %bind_addr, "API server listening");
        axum::serve(listener, app).await.expect("API server failed");
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 8. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");
    ctx.trigger_shutdown();

    if tokio::time::timeout(SHUTDOWN_GRACE, ingest_handle)
        .await
        .is_err()
    {
        warn!("ingestor did not stop within grace period");
    }
    pool.close().await;

    info!("Aurora Candle Feed shut down complete.");
    Ok(())
}

/// SQLite creates the database file on demand but not its parent directory.
fn ensure_sqlite_dir(database_url: &str) {
    let Some(path) = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
    else {
        return;
    };
    let path = path.split('?').next().unwrap_or(path);
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(dir = %parent.display(), error = %e, "could not create database directory");
            }
        }
    }
}
