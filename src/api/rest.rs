// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. Mutating routes (`symbol/add`,
// `symbol/remove`) answer `{"result":"ok"}` when they changed the tracked set
// and `{"result":""}` when the request was a no-op, so callers can retry them
// blindly.
//
// CORS is configured permissively for development; tighten `allowed_origins`
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::error::IngestError;
use crate::lifecycle::SymbolLifecycleManager;
use crate::storage::CandleStore;
use crate::types::Symbol;

#[derive(Clone)]
pub struct ApiState {
    pub lifecycle: Arc<SymbolLifecycleManager>,
    pub store: CandleStore,
    pub quote_currency: String,
}

// =============================================================================
// Router construction
// =============================================================================

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/symbol/add/:symbol", get(symbol_add))
        .route("/api/v1/symbol/remove/:symbol", get(symbol_remove))
        .route("/api/v1/symbol/list", get(symbol_list))
        .route("/api/v1/ohlcv/:symbol/:since", get(ohlcv))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Handlers
// =============================================================================

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "server_time": chrono::Utc::now().timestamp_millis(),
    }))
}

async fn symbol_add(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
) -> impl IntoResponse {
    match state.lifecycle.add(&symbol).await {
        Ok(true) => {
            info!(%symbol, "symbol added via api");
            (StatusCode::OK, Json(json!({ "result": "ok" })))
        }
        Ok(false) => (StatusCode::OK, Json(json!({ "result": "" }))),
        Err(e) => error_response(&symbol, "add", e),
    }
}

async fn symbol_remove(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
) -> impl IntoResponse {
    match state.lifecycle.remove(&symbol).await {
        Ok(true) => {
            info!(%symbol, "symbol removed via api");
            (StatusCode::OK, Json(json!({ "result": "ok" })))
        }
        Ok(false) => (StatusCode::OK, Json(json!({ "result": "" }))),
        Err(e) => error_response(&symbol, "remove", e),
    }
}

async fn symbol_list(State(state): State<ApiState>) -> impl IntoResponse {
    Json(json!({ "result": state.lifecycle.status() }))
}

/// Closed candles for one symbol with `open_time` strictly after `since`
/// (epoch milliseconds), oldest first.
async fn ohlcv(
    State(state): State<ApiState>,
    Path((symbol, since)): Path<(String, i64)>,
) -> impl IntoResponse {
    let parsed = match Symbol::normalize(&symbol, &state.quote_currency) {
        Ok(s) => s,
        Err(e) => {
            warn!(%symbol, error = %e, "ohlcv request with bad symbol");
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() })));
        }
    };
    match state.store.range(&parsed, since).await {
        Ok(rows) => (StatusCode::OK, Json(json!({ "result": rows }))),
        Err(e) => {
            error!(symbol = %parsed, error = %e, "ohlcv query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        }
    }
}

fn error_response(
    symbol: &str,
    op: &str,
    e: IngestError,
) -> (StatusCode, Json<serde_json::Value>) {
    let status = match e {
        IngestError::Configuration(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!(%symbol, op, error = %e, "symbol lifecycle request failed");
    (status, Json(json!({ "error": e.to_string() })))
}
