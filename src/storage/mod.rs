pub mod candles;
pub mod symbols;

pub use candles::CandleStore;
pub use symbols::SymbolRegistry;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::error::IngestError;

/// Open the SQLite pool and create the schema. Both stores share one pool.
pub async fn connect(database_url: &str) -> Result<SqlitePool, IngestError> {
    let options: SqliteConnectOptions = database_url
        .parse()
        .map_err(|e| IngestError::Configuration(format!("invalid database_url: {e}")))?;

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    create_schema(&pool).await?;

    info!(url = %database_url, "candle database ready");
    Ok(pool)
}

async fn create_schema(pool: &SqlitePool) -> Result<(), IngestError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS symbols (
            symbol TEXT PRIMARY KEY
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS candles (
            symbol    TEXT    NOT NULL,
            open_time INTEGER NOT NULL,
            open      REAL    NOT NULL,
            high      REAL    NOT NULL,
            low       REAL    NOT NULL,
            close     REAL    NOT NULL,
            volume    REAL    NOT NULL,
            PRIMARY KEY (symbol, open_time)
        )",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// In-memory pool for tests. A `:memory:` database is private to its
/// connection, so the pool is capped at one connection to keep every query
/// on the same schema.
#[cfg(test)]
pub async fn memory_pool() -> SqlitePool {
    let options: SqliteConnectOptions = "sqlite::memory:".parse().expect("valid memory url");
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("in-memory pool");
    create_schema(&pool).await.expect("schema");
    pool
}
