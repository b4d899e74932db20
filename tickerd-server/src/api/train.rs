//! Training API Handlers
//!
//! Endpoints that launch background training jobs. Both return immediately;
//! clients poll `GET /status/{task_id}` for the outcome. Declined starts
//! (already running, pool exhausted) are "try later" answers, never errors.

use axum::{Json, extract::State, http::StatusCode};

use tickerd_core::dto::{TaskAccepted, TickerRequest};

use crate::api::error::ApiResult;
use crate::api::{AppState, normalize_ticker};
use crate::tasks::{PARENT_TASK_ID, StartOutcome};

/// POST /train-parent
/// Launch parent-model training in the background.
pub async fn train_parent(
    State(state): State<AppState>,
) -> (StatusCode, Json<TaskAccepted>) {
    tracing::info!("Parent training requested");

    let outcome = state.tasks.start_train_parent().await;
    train_parent_response(outcome)
}

/// POST /train-child
/// Launch child-model training for one ticker in the background.
pub async fn train_child(
    State(state): State<AppState>,
    Json(req): Json<TickerRequest>,
) -> ApiResult<(StatusCode, Json<TaskAccepted>)> {
    let ticker = normalize_ticker(&req.ticker)?;
    tracing::info!("Child training requested for {}", ticker);

    let outcome = state.tasks.start_train_child(&ticker, None).await;
    if outcome.started() {
        // Any cached prediction was made by the model being replaced.
        state.cache.delete(&ticker).await?;
    }
    Ok(train_child_response(&ticker, outcome))
}

/// Response bodies match the deployment's existing clients: a fresh start
/// is 202 `started`; a declined start answers 200 `already running`.
fn train_parent_response(outcome: StartOutcome) -> (StatusCode, Json<TaskAccepted>) {
    match outcome {
        StartOutcome::Started => (
            StatusCode::ACCEPTED,
            Json(TaskAccepted::new("started", PARENT_TASK_ID)),
        ),
        StartOutcome::AlreadyRunning | StartOutcome::Busy => (
            StatusCode::OK,
            Json(TaskAccepted::new("already running", PARENT_TASK_ID)),
        ),
    }
}

/// The child variant of the declined body uses `running` plus a detail line.
fn train_child_response(ticker: &str, outcome: StartOutcome) -> (StatusCode, Json<TaskAccepted>) {
    match outcome {
        StartOutcome::Started => (
            StatusCode::ACCEPTED,
            Json(TaskAccepted::new("started", ticker)),
        ),
        StartOutcome::AlreadyRunning | StartOutcome::Busy => (
            StatusCode::OK,
            Json(
                TaskAccepted::new("running", ticker)
                    .with_detail("Training already in progress"),
            ),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_started_is_accepted() {
        let (code, body) = train_parent_response(StartOutcome::Started);
        assert_eq!(code, StatusCode::ACCEPTED);
        assert_eq!(body.0.status, "started");
        assert_eq!(body.0.task_id, PARENT_TASK_ID);

        let (code, body) = train_child_response("msft", StartOutcome::Started);
        assert_eq!(code, StatusCode::ACCEPTED);
        assert_eq!(body.0.status, "started");
        assert_eq!(body.0.task_id, "msft");
    }

    #[test]
    fn test_declined_parent_body() {
        for outcome in [StartOutcome::AlreadyRunning, StartOutcome::Busy] {
            let (code, body) = train_parent_response(outcome);
            assert_eq!(code, StatusCode::OK);
            assert_eq!(body.0.status, "already running");
        }
    }

    #[test]
    fn test_declined_child_body() {
        for outcome in [StartOutcome::AlreadyRunning, StartOutcome::Busy] {
            let (code, body) = train_child_response("msft", outcome);
            assert_eq!(code, StatusCode::OK);
            assert_eq!(body.0.status, "running");
            assert_eq!(body.0.detail.as_deref(), Some("Training already in progress"));
        }
    }

    // Declined starts are load-shedding answers; the client retries. They
    // must never surface as server errors.
    #[test]
    fn test_declined_starts_are_never_5xx() {
        for outcome in [StartOutcome::AlreadyRunning, StartOutcome::Busy] {
            let (code, _) = train_parent_response(outcome);
            assert!(!code.is_server_error(), "parent decline rendered {code}");
            let (code, _) = train_child_response("msft", outcome);
            assert!(!code.is_server_error(), "child decline rendered {code}");
        }
    }
}
