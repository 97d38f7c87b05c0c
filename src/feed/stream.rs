// =============================================================================
// Live kline WebSocket — one combined stream for all tracked symbols
// =============================================================================
//
// A single connection multiplexes `<symbol>@kline_<tf>` streams for the whole
// tracked snapshot.  The feed never signals candle closure in a way we rely
// on; the ingest loop infers it from timestamp monotonicity, so every update
// (open or closed) is forwarded as-is.
// =============================================================================

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::IngestError;
use crate::feed::{CandleBatch, CandleStream, FeedClient, LiveFeed};
use crate::types::{Candle, Symbol, Timeframe};

/// Build the combined-stream URL for all (symbol, timeframe) pairs.
fn build_stream_url(ws_base_url: &str, symbols: &[Symbol], timeframe: Timeframe) -> String {
    let streams: Vec<String> = symbols
        .iter()
        .map(|sym| format!("{}@kline_{timeframe}", sym.stream_name()))
        .collect();
    format!("{ws_base_url}/stream?streams={}", streams.join("/"))
}

/// Parse one combined-stream message into a (symbol, candle) update.
///
/// Expected shape:
/// ```json
/// { "stream": "ethusdt@kline_1m", "data": { "s": "ETHUSDT", "k": { ... } } }
/// ```
/// Returns `Ok(None)` for messages that are not kline updates (subscription
/// acks and similar); a malformed kline is an error the caller may log and
/// skip without tearing the stream down.
fn parse_kline_message(text: &str) -> Result<Option<(Symbol, Candle)>, IngestError> {
    let root: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| IngestError::Network(format!("failed to parse stream JSON: {e}")))?;

    // Stream-level error payloads tear the subscription down.
    if let Some(err) = root.get("error") {
        return Err(IngestError::Network(format!("stream error payload: {err}")));
    }

    // Combined-stream envelope or direct payload.
    let data = if root.get("data").is_some() {
        &root["data"]
    } else {
        &root
    };

    if data["e"].as_str() != Some("kline") {
        return Ok(None);
    }

    let symbol = data["s"]
        .as_str()
        .ok_or_else(|| IngestError::Network("kline message missing field s".into()))?;
    let k = &data["k"];

    let open_time = k["t"]
        .as_i64()
        .ok_or_else(|| IngestError::Network("kline message missing field k.t".into()))?;

    let candle = Candle {
        open_time,
        open: parse_field_f64(&k["o"], "k.o")?,
        high: parse_field_f64(&k["h"], "k.h")?,
        low: parse_field_f64(&k["l"], "k.l")?,
        close: parse_field_f64(&k["c"], "k.c")?,
        volume: parse_field_f64(&k["v"], "k.v")?,
    };

    Ok(Some((Symbol::from_canonical(symbol.to_uppercase()), candle)))
}

fn parse_field_f64(val: &serde_json::Value, name: &str) -> Result<f64, IngestError> {
    match val {
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .map_err(|e| IngestError::Network(format!("failed to parse {name} as f64: {e}"))),
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| IngestError::Network(format!("field {name} is not a valid f64"))),
        _ => Err(IngestError::Network(format!(
            "field {name} has unexpected JSON type"
        ))),
    }
}

// =============================================================================
// KlineSocket — CandleStream over a live WebSocket connection
// =============================================================================

pub struct KlineSocket {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl CandleStream for KlineSocket {
    async fn next_batch(&mut self) -> Result<Option<CandleBatch>, IngestError> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => match parse_kline_message(&text) {
                    // Each stream message carries one symbol's latest candle.
                    Ok(Some(update)) => return Ok(Some(vec![update])),
                    Ok(None) => continue,
                    Err(e) => {
                        // One malformed message must not terminate processing.
                        warn!(error = %e, "skipping unparseable stream message");
                        continue;
                    }
                },
                // tungstenite answers pings automatically.
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_))) => continue,
                Some(Ok(Message::Close(frame))) => {
                    info!(?frame, "kline WebSocket closed by feed");
                    return Ok(None);
                }
                Some(Ok(Message::Frame(_))) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(None),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.ws.close(None).await {
            debug!(error = %e, "error closing kline WebSocket");
        }
    }
}

#[async_trait]
impl LiveFeed for FeedClient {
    async fn subscribe(
        &self,
        symbols: &[Symbol],
        timeframe: Timeframe,
    ) -> Result<Box<dyn CandleStream>, IngestError> {
        let url = build_stream_url(self.ws_base_url(), symbols, timeframe);
        info!(count = symbols.len(), %timeframe, "connecting to kline WebSocket");

        let (ws, _response) = connect_async(url).await?;
        info!("kline WebSocket connected");
        Ok(Box::new(KlineSocket { ws }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_url_multiplexes_all_symbols() {
        let url = build_stream_url(
            "wss://stream.binance.com:9443",
            &[
                Symbol::from_canonical("BTCUSDT"),
                Symbol::from_canonical("ETHUSDT"),
            ],
            Timeframe::M1,
        );
        assert_eq!(
            url,
            "wss://stream.binance.com:9443/stream?streams=btcusdt@kline_1m/ethusdt@kline_1m"
        );
    }

    #[test]
    fn parse_combined_stream_kline() {
        let json = r#"{
            "stream": "ethusdt@kline_1m",
            "data": {
                "e": "kline",
                "s": "ETHUSDT",
                "k": {
                    "t": 1700000000000,
                    "i": "1m",
                    "o": "2200.00",
                    "h": "2210.50",
                    "l": "2195.00",
                    "c": "2205.25",
                    "v": "123.456",
                    "x": false
                }
            }
        }"#;
        let (symbol, candle) = parse_kline_message(json).unwrap().expect("kline update");
        assert_eq!(symbol.as_str(), "ETHUSDT");
        assert_eq!(candle.open_time, 1_700_000_000_000);
        assert!((candle.close - 2205.25).abs() < f64::EPSILON);
    }

    #[test]
    fn non_kline_messages_are_skipped() {
        // Subscription ack has no kline payload.
        let ack = r#"{"result": null, "id": 1}"#;
        assert!(parse_kline_message(ack).unwrap().is_none());
    }

    #[test]
    fn error_payload_is_a_feed_error() {
        let err = r#"{"error": {"code": 2, "msg": "Invalid request"}}"#;
        assert!(parse_kline_message(err).is_err());
    }

    #[test]
    fn malformed_kline_is_an_error_not_a_panic() {
        let bad = r#"{"e": "kline", "s": "BTCUSDT", "k": {"t": 1, "o": "not-a-number"}}"#;
        assert!(parse_kline_message(bad).is_err());
    }
}
