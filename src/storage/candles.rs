// =============================================================================
// CandleStore — append-only persisted candle rows keyed by (symbol, open_time)
// =============================================================================
//
// Rows are created in bulk (backfill commit) or singly (close detection) and
// never mutated afterwards.  The composite primary key enforces the
// one-candle-per-(symbol, open_time) invariant; a violated single insert
// surfaces as a typed `Integrity` error so the caller can skip the record
// without aborting the batch.
// =============================================================================

use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::debug;

use crate::error::IngestError;
use crate::types::{Candle, Symbol};

/// Rows per INSERT statement. SQLite caps bind parameters per statement;
/// 7 columns × 1000 rows stays well inside the limit.
const INSERT_CHUNK_ROWS: usize = 1000;

#[derive(Clone)]
pub struct CandleStore {
    pool: SqlitePool,
}

impl CandleStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ── Writes ──────────────────────────────────────────────────────────

    /// Insert one closed candle. A duplicate `(symbol, open_time)` returns
    /// the typed `Integrity` error instead of writing anything.
    pub async fn insert_one(&self, symbol: &Symbol, candle: &Candle) -> Result<(), IngestError> {
        sqlx::query(
            "INSERT INTO candles (symbol, open_time, open, high, low, close, volume)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(symbol.as_str())
        .bind(candle.open_time)
        .bind(candle.open)
        .bind(candle.high)
        .bind(candle.low)
        .bind(candle.close)
        .bind(candle.volume)
        .execute(&self.pool)
        .await
        .map_err(|e| IngestError::from_sqlx(e, symbol, candle.open_time))?;

        debug!(%symbol, open_time = candle.open_time, close = candle.close, "candle persisted");
        Ok(())
    }

    /// Insert a full backfill batch inside one transaction: either every row
    /// lands or none does, so a failure leaves no partial history behind.
    pub async fn insert_batch(
        &self,
        symbol: &Symbol,
        candles: &[Candle],
    ) -> Result<(), IngestError> {
        if candles.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for chunk in candles.chunks(INSERT_CHUNK_ROWS) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO candles (symbol, open_time, open, high, low, close, volume) ",
            );
            builder.push_values(chunk, |mut b, candle| {
                b.push_bind(symbol.as_str())
                    .push_bind(candle.open_time)
                    .push_bind(candle.open)
                    .push_bind(candle.high)
                    .push_bind(candle.low)
                    .push_bind(candle.close)
                    .push_bind(candle.volume);
            });
            builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(|e| IngestError::from_sqlx(e, symbol, chunk[0].open_time))?;
        }
        tx.commit().await?;

        debug!(%symbol, count = candles.len(), "backfill batch committed");
        Ok(())
    }

    // ── Reads ───────────────────────────────────────────────────────────

    /// Candles for a symbol with `open_time > since`, chronological order.
    pub async fn range(&self, symbol: &Symbol, since: i64) -> Result<Vec<Candle>, IngestError> {
        let rows = sqlx::query(
            "SELECT open_time, open, high, low, close, volume
             FROM candles
             WHERE symbol = ? AND open_time > ?
             ORDER BY open_time",
        )
        .bind(symbol.as_str())
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_candle).collect())
    }

    /// The newest persisted candle for a symbol, if any.
    pub async fn latest(&self, symbol: &Symbol) -> Result<Option<Candle>, IngestError> {
        let row = sqlx::query(
            "SELECT open_time, open, high, low, close, volume
             FROM candles
             WHERE symbol = ?
             ORDER BY open_time DESC
             LIMIT 1",
        )
        .bind(symbol.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(row_to_candle))
    }

    pub async fn count(&self, symbol: &Symbol) -> Result<u64, IngestError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM candles WHERE symbol = ?")
            .bind(symbol.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n") as u64)
    }

    // ── Deletes ─────────────────────────────────────────────────────────

    /// Delete every row for a symbol (lifecycle remove). Returns rows deleted.
    pub async fn delete_symbol(&self, symbol: &Symbol) -> Result<u64, IngestError> {
        let result = sqlx::query("DELETE FROM candles WHERE symbol = ?")
            .bind(symbol.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Housekeeping: delete rows older than the cutoff across all symbols.
    pub async fn delete_older_than(&self, cutoff_ms: i64) -> Result<u64, IngestError> {
        let result = sqlx::query("DELETE FROM candles WHERE open_time < ?")
            .bind(cutoff_ms)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn row_to_candle(row: &sqlx::sqlite::SqliteRow) -> Candle {
    Candle {
        open_time: row.get("open_time"),
        open: row.get("open"),
        high: row.get("high"),
        low: row.get("low"),
        close: row.get("close"),
        volume: row.get("volume"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory_pool;

    fn sample(open_time: i64, close: f64) -> Candle {
        Candle {
            open_time,
            open: close - 0.5,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 10.0,
        }
    }

    #[tokio::test]
    async fn batch_insert_and_range() {
        let store = CandleStore::new(memory_pool().await);
        let btc = Symbol::from_canonical("BTCUSDT");

        let batch: Vec<Candle> = (0..5).map(|i| sample(i * 60_000, 100.0 + i as f64)).collect();
        store.insert_batch(&btc, &batch).await.unwrap();

        assert_eq!(store.count(&btc).await.unwrap(), 5);

        let tail = store.range(&btc, 120_000).await.unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].open_time, 180_000);
        assert_eq!(tail[1].open_time, 240_000);
    }

    #[tokio::test]
    async fn duplicate_single_insert_is_integrity_error() {
        let store = CandleStore::new(memory_pool().await);
        let eth = Symbol::from_canonical("ETHUSDT");

        store.insert_one(&eth, &sample(0, 50.0)).await.unwrap();
        let err = store.insert_one(&eth, &sample(0, 51.0)).await.unwrap_err();
        assert!(matches!(err, IngestError::Integrity { open_time: 0, .. }));

        // The original row is untouched.
        let rows = store.range(&eth, -1).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].close, 50.0);
    }

    #[tokio::test]
    async fn batch_with_duplicate_writes_nothing() {
        let store = CandleStore::new(memory_pool().await);
        let eth = Symbol::from_canonical("ETHUSDT");

        store.insert_one(&eth, &sample(60_000, 50.0)).await.unwrap();

        // Batch collides with the existing row: the transaction must roll
        // back, leaving only the pre-existing candle.
        let batch = vec![sample(0, 49.0), sample(60_000, 50.5)];
        assert!(store.insert_batch(&eth, &batch).await.is_err());
        assert_eq!(store.count(&eth).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_symbol_only_touches_that_symbol() {
        let store = CandleStore::new(memory_pool().await);
        let btc = Symbol::from_canonical("BTCUSDT");
        let eth = Symbol::from_canonical("ETHUSDT");

        store.insert_batch(&btc, &[sample(0, 1.0), sample(60_000, 2.0)]).await.unwrap();
        store.insert_batch(&eth, &[sample(0, 3.0)]).await.unwrap();

        assert_eq!(store.delete_symbol(&btc).await.unwrap(), 2);
        assert_eq!(store.count(&btc).await.unwrap(), 0);
        assert_eq!(store.count(&eth).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn latest_and_retention_cutoff() {
        let store = CandleStore::new(memory_pool().await);
        let btc = Symbol::from_canonical("BTCUSDT");

        let batch: Vec<Candle> = (0..3).map(|i| sample(i * 60_000, 10.0 + i as f64)).collect();
        store.insert_batch(&btc, &batch).await.unwrap();

        assert_eq!(store.latest(&btc).await.unwrap().unwrap().open_time, 120_000);

        let deleted = store.delete_older_than(120_000).await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.count(&btc).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn empty_batch_is_a_noop() {
        let store = CandleStore::new(memory_pool().await);
        let btc = Symbol::from_canonical("BTCUSDT");
        store.insert_batch(&btc, &[]).await.unwrap();
        assert_eq!(store.count(&btc).await.unwrap(), 0);
    }
}
