//! Status API Handler
//!
//! Polling endpoint for background task status.

use axum::{
    Json,
    extract::{Path, State},
};

use tickerd_core::dto::StatusResponse;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::tasks::PARENT_TASK_ID;

/// GET /status/{task_id}
/// Look up a task's status record. `parent` is accepted as an alias for
/// the parent training task id; ticker ids are matched case-insensitively.
pub async fn get_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    let task_id = canonical_task_id(&task_id);
    tracing::debug!("Status requested for {}", task_id);

    match state.tasks.status(&task_id).await {
        Some(status) => Ok(Json(StatusResponse::new(task_id, status))),
        None => Err(ApiError::NotFound(format!("Task '{task_id}' not found."))),
    }
}

fn canonical_task_id(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    if lowered == "parent" {
        PARENT_TASK_ID.to_string()
    } else {
        lowered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_alias() {
        assert_eq!(canonical_task_id("parent"), PARENT_TASK_ID);
        assert_eq!(canonical_task_id("Parent"), PARENT_TASK_ID);
        assert_eq!(canonical_task_id(PARENT_TASK_ID), PARENT_TASK_ID);
    }

    #[test]
    fn test_tickers_lower_cased() {
        assert_eq!(canonical_task_id("MSFT"), "msft");
        assert_eq!(canonical_task_id(" aapl "), "aapl");
    }
}
