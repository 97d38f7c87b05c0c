// =============================================================================
// Runtime Configuration — feed settings loaded from JSON + environment
// =============================================================================
//
// Every field carries `#[serde(default)]` so that loading an older config
// file never breaks when new fields are added.  Environment variables
// (prefix `AURORA_FEED_`) override file values, matching how the engine is
// deployed in containers.  `validate()` runs before any task starts; an
// invalid timeframe, history start or bind address is fatal at startup.
// =============================================================================

use std::path::Path;

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::IngestError;
use crate::types::Timeframe;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_quote_currency() -> String {
    "USDT".to_string()
}

fn default_timeframe() -> String {
    "1m".to_string()
}

fn default_history_start() -> String {
    "2024-01-01T00:00:00Z".to_string()
}

fn default_database_url() -> String {
    "sqlite://db/aurora-feed.sqlite?mode=rwc".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:9130".to_string()
}

fn default_rest_base_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_ws_base_url() -> String {
    "wss://stream.binance.com:9443".to_string()
}

fn default_idle_poll_secs() -> u64 {
    5
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

fn default_retention_minutes() -> u64 {
    10_080 // one week
}

fn default_staleness_minutes() -> i64 {
    30
}

// =============================================================================
// RuntimeConfig
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Quote currency every tracked pair settles in (e.g. "USDT").
    #[serde(default = "default_quote_currency")]
    pub quote_currency: String,

    /// Candle interval tracked process-wide.
    #[serde(default = "default_timeframe")]
    pub timeframe: String,

    /// RFC 3339 instant historical backfill starts from.
    #[serde(default = "default_history_start")]
    pub history_start: String,

    /// sqlx connection string for the candle database.
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// REST API listen address.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Exchange REST base URL (overridden in tests).
    #[serde(default = "default_rest_base_url")]
    pub rest_base_url: String,

    /// Exchange WebSocket base URL.
    #[serde(default = "default_ws_base_url")]
    pub ws_base_url: String,

    /// Sleep between snapshot polls while no symbols are tracked.
    #[serde(default = "default_idle_poll_secs")]
    pub idle_poll_secs: u64,

    /// Delay before reopening a subscription after a feed error.
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    /// Candles older than this are deleted by housekeeping. 0 disables.
    #[serde(default = "default_retention_minutes")]
    pub retention_minutes: u64,

    /// Age at which the freshness watchdog flags a symbol's data as stale.
    #[serde(default = "default_staleness_minutes")]
    pub staleness_minutes: i64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults always deserialize")
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file, falling back to defaults when the
    /// file does not exist, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let mut config = match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<Self>(&raw) {
                Ok(cfg) => {
                    info!(path = %path.display(), "runtime config loaded");
                    cfg
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "config file unreadable, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                info!(path = %path.display(), "no config file found, using defaults");
                Self::default()
            }
        };
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        fn override_from(var: &str, field: &mut String) {
            if let Ok(val) = std::env::var(var) {
                if !val.trim().is_empty() {
                    *field = val.trim().to_string();
                }
            }
        }
        override_from("AURORA_FEED_QUOTE", &mut self.quote_currency);
        override_from("AURORA_FEED_TIMEFRAME", &mut self.timeframe);
        override_from("AURORA_FEED_HISTORY_START", &mut self.history_start);
        override_from("AURORA_FEED_DATABASE_URL", &mut self.database_url);
        override_from("AURORA_FEED_BIND_ADDR", &mut self.bind_addr);
        override_from("AURORA_FEED_REST_URL", &mut self.rest_base_url);
        override_from("AURORA_FEED_WS_URL", &mut self.ws_base_url);
    }

    // ── Validated accessors ─────────────────────────────────────────────

    /// Parse the configured timeframe, surfacing a configuration error.
    pub fn parsed_timeframe(&self) -> Result<Timeframe, IngestError> {
        self.timeframe.parse()
    }

    /// Parse the history start instant into epoch milliseconds.
    pub fn history_start_ms(&self) -> Result<i64, IngestError> {
        DateTime::parse_from_rfc3339(&self.history_start)
            .map(|dt| dt.timestamp_millis())
            .map_err(|e| {
                IngestError::Configuration(format!(
                    "invalid history_start '{}': {e}",
                    self.history_start
                ))
            })
    }

    /// Check every field that can fail at runtime. Called once at startup;
    /// any error here is fatal.
    pub fn validate(&self) -> Result<(), IngestError> {
        self.parsed_timeframe()?;
        self.history_start_ms()?;

        if self.quote_currency.trim().is_empty() {
            return Err(IngestError::Configuration(
                "quote_currency must not be empty".into(),
            ));
        }
        self.bind_addr
            .parse::<std::net::SocketAddr>()
            .map_err(|e| {
                IngestError::Configuration(format!("invalid bind_addr '{}': {e}", self.bind_addr))
            })?;
        Ok(())
    }
}
