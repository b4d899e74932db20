//! API Module
//!
//! HTTP API layer for the server.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod health;
pub mod predict;
pub mod status;
pub mod system;
pub mod train;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    middleware,
    routing::{MethodRouter, delete, get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::error::{ApiError, ApiResult};
use crate::cache::PredictionCache;
use crate::executor::JobExecutor;
use crate::metrics::Metrics;
use crate::ratelimit::{self, RateLimiter, RatePolicy};
use crate::store::StateStore;
use crate::tasks::TaskManager;

const HOUR: Duration = Duration::from_secs(3600);

/// Per-endpoint request budgets, counted per fixed one-hour window.
/// Training is expensive, prediction is cheap.
const TRAIN_PARENT_LIMIT: RatePolicy = RatePolicy::new("train_parent", 5, HOUR);
const TRAIN_CHILD_LIMIT: RatePolicy = RatePolicy::new("train_child", 5, HOUR);
const PREDICT_PARENT_LIMIT: RatePolicy = RatePolicy::new("predict_parent", 40, HOUR);
const PREDICT_CHILD_LIMIT: RatePolicy = RatePolicy::new("predict_child", 40, HOUR);

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub tasks: Arc<TaskManager>,
    pub cache: Arc<PredictionCache>,
    pub store: Arc<dyn StateStore>,
    pub executor: Arc<dyn JobExecutor>,
    pub limiter: Arc<RateLimiter>,
    pub metrics: Option<Arc<Metrics>>,
}

impl AppState {
    fn count_prediction(&self, kind: &str) {
        if let Some(m) = &self.metrics {
            m.prediction_total.with_label_values(&[kind]).inc();
        }
    }

    /// Latency timer that observes on drop; `None` when metrics are off.
    fn prediction_timer(&self, kind: &str) -> Option<prometheus::HistogramTimer> {
        self.metrics
            .as_ref()
            .map(|m| m.prediction_latency.with_label_values(&[kind]).start_timer())
    }
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let limiter = Arc::clone(&state.limiter);

    Router::new()
        // Health and metrics
        .route("/health", get(health::health_check))
        .route("/metrics", get(health::metrics))
        // Training endpoints (paths are frozen for existing clients)
        .route(
            "/train-parent",
            throttled(
                post(train::train_parent),
                Arc::clone(&limiter),
                TRAIN_PARENT_LIMIT,
            ),
        )
        .route(
            "/train-child",
            throttled(
                post(train::train_child),
                Arc::clone(&limiter),
                TRAIN_CHILD_LIMIT,
            ),
        )
        // Prediction endpoints
        .route(
            "/predict-parent",
            throttled(
                post(predict::predict_parent),
                Arc::clone(&limiter),
                PREDICT_PARENT_LIMIT,
            ),
        )
        .route(
            "/predict-child",
            throttled(
                post(predict::predict_child),
                Arc::clone(&limiter),
                PREDICT_CHILD_LIMIT,
            ),
        )
        // Status polling
        .route("/status/{task_id}", get(status::get_status))
        // System endpoints
        .route("/system/cache", get(system::cache_info))
        .route("/system/reset", delete(system::reset))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Wraps a route with the rate-limit middleware for one policy.
fn throttled(
    route: MethodRouter<AppState>,
    limiter: Arc<RateLimiter>,
    policy: RatePolicy,
) -> MethodRouter<AppState> {
    route.layer(middleware::from_fn(
        move |req: axum::extract::Request, next: axum::middleware::Next| {
            let limiter = Arc::clone(&limiter);
            let policy = policy.clone();
            async move { ratelimit::enforce(limiter, policy, req, next).await }
        },
    ))
}

/// Validates a client-supplied ticker and lower-cases it into a task id.
fn normalize_ticker(raw: &str) -> ApiResult<String> {
    let ticker = raw.trim().to_lowercase();
    let valid = !ticker.is_empty()
        && ticker.len() <= 10
        && ticker
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
    if !valid {
        return Err(ApiError::BadRequest(format!(
            "Invalid ticker '{raw}'. Expected 1-10 alphanumeric characters."
        )));
    }
    Ok(ticker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorError;
    use crate::store::memory::MemoryStore;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tickerd_core::ResultMap;
    use tower::ServiceExt;

    struct NullExecutor;

    #[async_trait]
    impl JobExecutor for NullExecutor {
        async fn train_parent(&self) -> Result<ResultMap, ExecutorError> {
            Ok(ResultMap::new())
        }

        async fn train_child(&self, _ticker: &str) -> Result<ResultMap, ExecutorError> {
            Ok(ResultMap::new())
        }

        async fn predict_parent(&self) -> Result<ResultMap, ExecutorError> {
            Ok(ResultMap::new())
        }

        async fn predict_child(&self, _ticker: &str) -> Result<ResultMap, ExecutorError> {
            Ok(ResultMap::new())
        }
    }

    fn test_state() -> AppState {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let executor: Arc<dyn JobExecutor> = Arc::new(NullExecutor);
        AppState {
            tasks: Arc::new(TaskManager::new(
                2,
                Arc::clone(&store),
                Arc::clone(&executor),
                None,
            )),
            cache: Arc::new(PredictionCache::new(
                Arc::clone(&store),
                None,
                Duration::from_secs(60),
            )),
            store: Arc::clone(&store),
            executor,
            limiter: Arc::new(RateLimiter::new(Arc::clone(&store))),
            metrics: None,
        }
    }

    async fn request(app: &Router, method: &str, path: &str) -> StatusCode {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(path)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        response.status()
    }

    #[test]
    fn test_normalize_ticker_accepts_common_forms() {
        assert_eq!(normalize_ticker("MSFT").unwrap(), "msft");
        assert_eq!(normalize_ticker(" aapl ").unwrap(), "aapl");
        assert_eq!(normalize_ticker("BRK.B").unwrap(), "brk.b");
    }

    #[test]
    fn test_normalize_ticker_rejects_junk() {
        assert!(normalize_ticker("").is_err());
        assert!(normalize_ticker("   ").is_err());
        assert!(normalize_ticker("way_too_long_ticker").is_err());
        assert!(normalize_ticker("a b").is_err());
        assert!(normalize_ticker("../etc").is_err());
    }

    // Route paths are a compatibility surface; existing clients call the
    // hyphenated forms.
    #[tokio::test]
    async fn test_hyphenated_route_paths() {
        let app = create_router(test_state());

        for path in [
            "/train-parent",
            "/train-child",
            "/predict-parent",
            "/predict-child",
        ] {
            let status = request(&app, "POST", path).await;
            assert_ne!(status, StatusCode::NOT_FOUND, "{path} not routed");
        }

        for path in [
            "/train/parent",
            "/train/child",
            "/predict/parent",
            "/predict/child",
        ] {
            let status = request(&app, "POST", path).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{path} should not exist");
        }
    }

    #[tokio::test]
    async fn test_health_reports_healthy() {
        let app = create_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_train_parent_rate_limited_after_budget() {
        let app = create_router(test_state());

        for i in 0..TRAIN_PARENT_LIMIT.limit {
            let status = request(&app, "POST", "/train-parent").await;
            assert_ne!(
                status,
                StatusCode::TOO_MANY_REQUESTS,
                "request {i} rejected early"
            );
        }
        let status = request(&app, "POST", "/train-parent").await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }
}
