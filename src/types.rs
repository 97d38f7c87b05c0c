// =============================================================================
// Shared types used across the Aurora candle feed
// =============================================================================

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::IngestError;

// =============================================================================
// Symbol
// =============================================================================

/// Canonical trading-pair identifier, e.g. `ETHUSDT`.
///
/// Constructed only through [`Symbol::normalize`], which accepts the raw forms
/// callers actually send (`eth`, `ETH/USDT`, `ethusdt`) and canonicalizes them
/// against the configured quote currency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Normalize a raw pair string against the configured quote currency.
    ///
    /// * `"eth"`      + `"USDT"` → `ETHUSDT`
    /// * `"ETH/USDT"` + `"USDT"` → `ETHUSDT`
    /// * `"ethusdt"`  + `"USDT"` → `ETHUSDT`
    pub fn normalize(raw: &str, quote: &str) -> Result<Self, IngestError> {
        let quote = quote.trim().to_uppercase();
        let cleaned: String = raw
            .trim()
            .to_uppercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();

        if cleaned.is_empty() {
            return Err(IngestError::Configuration(format!(
                "cannot normalize empty symbol from input '{raw}'"
            )));
        }

        let base = cleaned.strip_suffix(quote.as_str()).unwrap_or(&cleaned);
        if base.is_empty() {
            return Err(IngestError::Configuration(format!(
                "symbol '{raw}' has no base asset for quote {quote}"
            )));
        }

        Ok(Self(format!("{base}{quote}")))
    }

    /// Wrap a string that is already in canonical form (e.g. read back from
    /// the registry table, which only ever stores canonical pairs).
    pub fn from_canonical(pair: impl Into<String>) -> Self {
        Self(pair.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lower-case form used in WebSocket stream names (`ethusdt@kline_1m`).
    pub fn stream_name(&self) -> String {
        self.0.to_lowercase()
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Timeframe
// =============================================================================

/// Candle interval tracked by the feed. One timeframe applies process-wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    /// Candle duration in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        match self {
            Self::M1 => 60_000,
            Self::M5 => 300_000,
            Self::M15 => 900_000,
            Self::H1 => 3_600_000,
            Self::H4 => 14_400_000,
            Self::D1 => 86_400_000,
        }
    }
}

impl std::str::FromStr for Timeframe {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1m" => Ok(Self::M1),
            "5m" => Ok(Self::M5),
            "15m" => Ok(Self::M15),
            "1h" => Ok(Self::H1),
            "4h" => Ok(Self::H4),
            "1d" => Ok(Self::D1),
            other => Err(IngestError::Configuration(format!(
                "unsupported timeframe '{other}' (expected 1m, 5m, 15m, 1h, 4h or 1d)"
            ))),
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1d",
        };
        write!(f, "{s}")
    }
}

// =============================================================================
// Candle
// =============================================================================

/// A single OHLCV candle. `open_time` is the exchange epoch-millisecond
/// open timestamp of the candle's bucket, which together with the symbol
/// uniquely identifies a persisted row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

// =============================================================================
// TrackedSnapshot
// =============================================================================

/// Immutable, versioned value describing the full set of symbols that are
/// meant to be subscribed. Replaced wholesale on every registry change and
/// shared behind `Arc`, never mutated in place — the ingest loop compares
/// versions to detect staleness.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedSnapshot {
    pub version: u64,
    pub symbols: Vec<Symbol>,
}

impl TrackedSnapshot {
    pub fn empty() -> Arc<Self> {
        Arc::new(Self {
            version: 0,
            symbols: Vec::new(),
        })
    }

    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.symbols.binary_search(symbol).is_ok()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_accepts_all_raw_forms() {
        for raw in ["eth", "ETH", "eth/usdt", "ETH/USDT", "ethusdt", " EthUsdt "] {
            let sym = Symbol::normalize(raw, "USDT").expect("should normalize");
            assert_eq!(sym.as_str(), "ETHUSDT");
        }
    }

    #[test]
    fn normalize_rejects_empty_input() {
        assert!(Symbol::normalize("", "USDT").is_err());
        assert!(Symbol::normalize("  /  ", "USDT").is_err());
    }

    #[test]
    fn normalize_rejects_bare_quote() {
        // "USDT" alone has no base asset.
        assert!(Symbol::normalize("USDT", "USDT").is_err());
    }

    #[test]
    fn stream_name_is_lowercase() {
        let sym = Symbol::normalize("BTC", "USDT").unwrap();
        assert_eq!(sym.stream_name(), "btcusdt");
    }

    #[test]
    fn timeframe_roundtrip_and_duration() {
        let tf: Timeframe = "1m".parse().unwrap();
        assert_eq!(tf, Timeframe::M1);
        assert_eq!(tf.duration_ms(), 60_000);
        assert_eq!(tf.to_string(), "1m");

        let tf: Timeframe = "4h".parse().unwrap();
        assert_eq!(tf.duration_ms(), 14_400_000);

        assert!("3m".parse::<Timeframe>().is_err());
    }

    #[test]
    fn snapshot_contains_uses_sorted_order() {
        let snap = TrackedSnapshot {
            version: 1,
            symbols: vec![
                Symbol::from_canonical("BTCUSDT"),
                Symbol::from_canonical("ETHUSDT"),
            ],
        };
        assert!(snap.contains(&Symbol::from_canonical("BTCUSDT")));
        assert!(!snap.contains(&Symbol::from_canonical("XRPUSDT")));
    }
}
