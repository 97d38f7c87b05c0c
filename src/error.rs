// =============================================================================
// Typed error kinds for the ingestion and lifecycle subsystem
// =============================================================================
//
// Errors are classified at the feed/storage boundary so that callers can
// dispatch on the kind instead of pattern-matching error text:
//   - Network       transient transport failure; retry, never mutate state
//   - Rejected      the feed refuses a specific symbol; carries the symbol so
//                   corrective removal can be dispatched without string parsing
//   - Integrity     duplicate (symbol, open_time) on a single-row write; the
//                   offending record is logged and skipped, never the batch
//   - Storage       any other database failure
//   - Configuration invalid settings; fatal at startup only
//   - Cancelled     shutdown observed mid-operation
// =============================================================================

use thiserror::Error;

use crate::types::Symbol;

#[derive(Error, Debug)]
pub enum IngestError {
    /// Transient transport failure (HTTP, WebSocket, DNS). Retryable.
    #[error("network error: {0}")]
    Network(String),

    /// The feed rejected a specific symbol (unknown, delisted, too new).
    #[error("feed rejected symbol {symbol}: {reason}")]
    Rejected { symbol: Symbol, reason: String },

    /// A write would violate the one-candle-per-(symbol, open_time) invariant.
    #[error("duplicate candle for {symbol} at {open_time}")]
    Integrity { symbol: Symbol, open_time: i64 },

    /// Database failure other than a uniqueness violation.
    #[error("storage error: {0}")]
    Storage(String),

    /// Invalid configuration. Surfaces as a fatal startup error.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The shared shutdown signal was observed mid-operation.
    #[error("operation cancelled by shutdown")]
    Cancelled,
}

impl IngestError {
    /// True for failures that are expected to succeed on a later retry
    /// without any corrective action.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Cancelled)
    }

    /// Map a database error, folding uniqueness violations into the typed
    /// `Integrity` kind for the given row key.
    pub fn from_sqlx(err: sqlx::Error, symbol: &Symbol, open_time: i64) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.is_unique_violation() {
                return Self::Integrity {
                    symbol: symbol.clone(),
                    open_time,
                };
            }
        }
        Self::Storage(err.to_string())
    }
}

impl From<sqlx::Error> for IngestError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => {
                Self::Network(err.to_string())
            }
            _ => Self::Storage(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for IngestError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for IngestError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Network(err.to_string())
    }
}
