//! System API Handlers
//!
//! Operational endpoints for inspecting and resetting shared state.

use axum::{Json, extract::State};
use serde_json::json;

use tickerd_core::dto::CacheInfo;

use crate::api::AppState;
use crate::api::error::ApiResult;

/// GET /system/cache
/// List tickers with a cached prediction.
pub async fn cache_info(State(state): State<AppState>) -> ApiResult<Json<CacheInfo>> {
    let mut cached_tickers = state.cache.cached_tickers().await?;
    cached_tickers.sort();

    let count = cached_tickers.len();
    Ok(Json(CacheInfo {
        cached_tickers,
        count,
    }))
}

/// DELETE /system/reset
/// Flush all shared state: task statuses, cached predictions, and rate
/// limit counters. Destructive; intended for test and dev environments.
pub async fn reset(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    tracing::warn!("Flushing all shared state");
    state.store.flush_all().await?;
    Ok(Json(json!({"status": "reset"})))
}
