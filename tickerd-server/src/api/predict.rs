//! Prediction API Handlers
//!
//! Predictions run inline on the request path (they are fast compared to
//! training). Child predictions consult the result cache first, and a
//! missing child model triggers auto-training with a chained
//! predict-and-cache step.

use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode};

use tickerd_core::dto::{PredictionResponse, TaskAccepted, TickerRequest};

use crate::api::error::{ApiError, ApiResult};
use crate::api::{AppState, normalize_ticker};
use crate::cache::PredictionCache;
use crate::executor::JobExecutor;
use crate::tasks::{ChainFn, StartOutcome};

/// POST /predict-parent
/// Run a prediction with the parent model.
pub async fn predict_parent(
    State(state): State<AppState>,
) -> ApiResult<Json<PredictionResponse>> {
    tracing::debug!("Parent prediction requested");

    let timer = state.prediction_timer("parent");
    let result = state.executor.predict_parent().await?;
    drop(timer);
    state.count_prediction("parent");

    Ok(Json(PredictionResponse { result }))
}

/// POST /predict-child
/// Run a prediction with a ticker's child model.
///
/// Cache hit: returns the cached result. Cache miss: runs the prediction
/// and caches it. Model not trained yet: starts training with a chained
/// predict-and-cache step and answers 202.
pub async fn predict_child(
    State(state): State<AppState>,
    Json(req): Json<TickerRequest>,
) -> ApiResult<axum::response::Response> {
    use axum::response::IntoResponse;

    let ticker = normalize_ticker(&req.ticker)?;
    tracing::debug!("Child prediction requested for {}", ticker);

    if let Some(result) = state.cache.get(&ticker).await {
        state.count_prediction("child");
        return Ok(Json(PredictionResponse { result }).into_response());
    }

    let timer = state.prediction_timer("child");
    match state.executor.predict_child(&ticker).await {
        Ok(result) => {
            drop(timer);
            state.count_prediction("child");
            state.cache.set(&ticker, &result).await?;
            Ok(Json(PredictionResponse { result }).into_response())
        }
        Err(err) if err.indicates_missing_model() => {
            drop(timer);
            tracing::info!("No model for {}, starting auto-training", ticker);

            let chain = predict_and_cache(
                Arc::clone(&state.executor),
                Arc::clone(&state.cache),
                ticker.clone(),
            );
            let outcome = state.tasks.start_train_child(&ticker, Some(chain)).await;
            Ok(auto_train_response(&ticker, outcome).into_response())
        }
        Err(err) => Err(ApiError::from(err)),
    }
}

/// Continuation run after auto-training succeeds: predicts with the fresh
/// model and populates the cache so the client's retry is a cache hit.
fn predict_and_cache(
    executor: Arc<dyn JobExecutor>,
    cache: Arc<PredictionCache>,
    ticker: String,
) -> ChainFn {
    Box::new(move || {
        Box::pin(async move {
            let result = executor.predict_child(&ticker).await?;
            cache.set(&ticker, &result).await?;
            Ok(())
        })
    })
}

/// Every auto-train branch answers 202 `training`; only the detail line
/// tells the client whether this request started the job. Existing clients
/// key their retry loop on the `training` status.
fn auto_train_response(ticker: &str, outcome: StartOutcome) -> (StatusCode, Json<TaskAccepted>) {
    let detail = match outcome {
        StartOutcome::Started => {
            format!("Model for {ticker} missing. Training started (with auto-prediction).")
        }
        StartOutcome::AlreadyRunning | StartOutcome::Busy => {
            "Training in progress. Please retry later.".to_string()
        }
    };
    (
        StatusCode::ACCEPTED,
        Json(TaskAccepted::new("training", ticker).with_detail(detail)),
    )
}
