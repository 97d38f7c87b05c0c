// =============================================================================
// Binance REST client — public kline endpoint with typed error classification
// =============================================================================
//
// Only public market-data endpoints are used, so no request signing is
// required.  A 4xx response is credited to the requested symbol and mapped
// to the typed `Rejected` error; 5xx and transport failures are `Network`
// and therefore retryable.
// =============================================================================

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::IngestError;
use crate::feed::HistorySource;
use crate::types::{Candle, Symbol, Timeframe};

/// Binance market-data client. Cheap to clone; the inner reqwest client
/// pools connections.
#[derive(Clone)]
pub struct FeedClient {
    rest_base_url: String,
    ws_base_url: String,
    client: reqwest::Client,
}

impl FeedClient {
    pub fn new(rest_base_url: impl Into<String>, ws_base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            rest_base_url: rest_base_url.into(),
            ws_base_url: ws_base_url.into(),
            client,
        }
    }

    pub fn ws_base_url(&self) -> &str {
        &self.ws_base_url
    }

    /// GET /api/v3/klines — one page of historical candles.
    ///
    /// Response is Binance's array-of-arrays format:
    ///   [0] openTime, [1] open, [2] high, [3] low, [4] close, [5] volume, ...
    pub async fn fetch_klines(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        since: i64,
        limit: u32,
    ) -> Result<Vec<Candle>, IngestError> {
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&startTime={}&limit={}",
            self.rest_base_url, symbol, timeframe, since, limit
        );

        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        let body: serde_json::Value = resp.json().await?;

        if !status.is_success() {
            let reason = body["msg"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| body.to_string());

            // Client errors are the feed refusing this symbol/request;
            // anything else is transient.
            if status.is_client_error() {
                return Err(IngestError::Rejected {
                    symbol: symbol.clone(),
                    reason,
                });
            }
            return Err(IngestError::Network(format!(
                "GET /api/v3/klines returned {status}: {reason}"
            )));
        }

        let raw = body
            .as_array()
            .ok_or_else(|| IngestError::Network("klines response is not an array".into()))?;

        let mut candles = Vec::with_capacity(raw.len());
        for entry in raw {
            let arr = match entry.as_array() {
                Some(arr) if arr.len() >= 6 => arr,
                _ => {
                    warn!(%symbol, "skipping malformed kline entry");
                    continue;
                }
            };

            let open_time = match arr[0].as_i64() {
                Some(t) => t,
                None => {
                    warn!(%symbol, "skipping kline entry without open time");
                    continue;
                }
            };

            candles.push(Candle {
                open_time,
                open: parse_str_f64(&arr[1])?,
                high: parse_str_f64(&arr[2])?,
                low: parse_str_f64(&arr[3])?,
                close: parse_str_f64(&arr[4])?,
                volume: parse_str_f64(&arr[5])?,
            });
        }

        debug!(%symbol, %timeframe, since, count = candles.len(), "klines page fetched");
        Ok(candles)
    }
}

#[async_trait]
impl HistorySource for FeedClient {
    async fn fetch_page(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        since: i64,
        limit: u32,
    ) -> Result<Vec<Candle>, IngestError> {
        self.fetch_klines(symbol, timeframe, since, limit).await
    }
}

/// Binance sends numeric kline values as JSON strings.
fn parse_str_f64(val: &serde_json::Value) -> Result<f64, IngestError> {
    if let Some(s) = val.as_str() {
        s.parse::<f64>()
            .map_err(|e| IngestError::Network(format!("failed to parse '{s}' as f64: {e}")))
    } else if let Some(n) = val.as_f64() {
        Ok(n)
    } else {
        Err(IngestError::Network(format!(
            "expected string or number, got: {val}"
        )))
    }
}

impl std::fmt::Debug for FeedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedClient")
            .field("rest_base_url", &self.rest_base_url)
            .field("ws_base_url", &self.ws_base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_str_f64_accepts_both_forms() {
        assert_eq!(parse_str_f64(&serde_json::json!("37000.5")).unwrap(), 37000.5);
        assert_eq!(parse_str_f64(&serde_json::json!(42.0)).unwrap(), 42.0);
        assert!(parse_str_f64(&serde_json::json!(null)).is_err());
        assert!(parse_str_f64(&serde_json::json!("abc")).is_err());
    }
}
