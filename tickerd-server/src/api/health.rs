//! Health and Metrics API Handlers
//!
//! Liveness endpoint and the Prometheus text exposition endpoint.

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::api::AppState;

/// GET /health
/// Health check endpoint; reports store reachability without failing.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let redis = if state.store.ping().await.is_ok() {
        "up"
    } else {
        "down"
    };

    // "healthy" is what deployed probes match on.
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "redis": redis,
    }))
}

/// GET /metrics
/// Prometheus metrics in the text exposition format. Store gauges are
/// refreshed at scrape time.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    if let Some(m) = &state.metrics {
        match state.store.key_count().await {
            Ok(count) => {
                m.redis_up.set(1.0);
                m.redis_keys.set(count as f64);
            }
            Err(_) => m.redis_up.set(0.0),
        }
    }

    let body = match &state.metrics {
        Some(m) => m.render(),
        None => String::new(),
    };
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}
