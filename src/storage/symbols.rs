// =============================================================================
// SymbolRegistry — persisted set of tracked symbols
// =============================================================================
//
// Source of truth across restarts: `list()` always reads the table, never an
// in-memory cache, so a restarted process recovers exactly the prior
// membership.
// =============================================================================

use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::error::IngestError;
use crate::types::Symbol;

#[derive(Clone)]
pub struct SymbolRegistry {
    pool: SqlitePool,
}

impl SymbolRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a symbol. Returns `false` (no-op) when it is already present.
    pub async fn add(&self, symbol: &Symbol) -> Result<bool, IngestError> {
        let result = sqlx::query("INSERT OR IGNORE INTO symbols (symbol) VALUES (?)")
            .bind(symbol.as_str())
            .execute(&self.pool)
            .await?;

        let inserted = result.rows_affected() > 0;
        debug!(%symbol, inserted, "registry add");
        Ok(inserted)
    }

    /// Delete a symbol. Returns `false` when it was absent.
    pub async fn remove(&self, symbol: &Symbol) -> Result<bool, IngestError> {
        let result = sqlx::query("DELETE FROM symbols WHERE symbol = ?")
            .bind(symbol.as_str())
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected() > 0;
        debug!(%symbol, removed, "registry remove");
        Ok(removed)
    }

    /// Authoritative current membership, ordered, read from storage.
    pub async fn list(&self) -> Result<Vec<Symbol>, IngestError> {
        let rows = sqlx::query("SELECT symbol FROM symbols ORDER BY symbol")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| Symbol::from_canonical(row.get::<String, _>("symbol")))
            .collect())
    }

    pub async fn contains(&self, symbol: &Symbol) -> Result<bool, IngestError> {
        let row = sqlx::query("SELECT 1 FROM symbols WHERE symbol = ?")
            .bind(symbol.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory_pool;

    #[tokio::test]
    async fn add_is_idempotent() {
        let registry = SymbolRegistry::new(memory_pool().await);
        let btc = Symbol::from_canonical("BTCUSDT");

        assert!(registry.add(&btc).await.unwrap());
        assert!(!registry.add(&btc).await.unwrap());
        assert_eq!(registry.list().await.unwrap(), vec![btc]);
    }

    #[tokio::test]
    async fn remove_absent_returns_false() {
        let registry = SymbolRegistry::new(memory_pool().await);
        let eth = Symbol::from_canonical("ETHUSDT");

        assert!(!registry.remove(&eth).await.unwrap());
        registry.add(&eth).await.unwrap();
        assert!(registry.remove(&eth).await.unwrap());
        assert!(registry.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_is_ordered() {
        let registry = SymbolRegistry::new(memory_pool().await);
        for pair in ["XRPUSDT", "BTCUSDT", "ETHUSDT"] {
            registry.add(&Symbol::from_canonical(pair)).await.unwrap();
        }

        let listed = registry.list().await.unwrap();
        let pairs: Vec<&str> = listed.iter().map(|s| s.as_str()).collect();
        assert_eq!(pairs, vec!["BTCUSDT", "ETHUSDT", "XRPUSDT"]);
    }
}
