//! DTOs for the HTTP API
//!
//! Request/response shapes shared between the server and API clients.
//! Field names match the original deployment's wire format.

use serde::{Deserialize, Serialize};

use crate::task::{ResultMap, TaskStatus};

/// Request body for ticker-scoped operations (train-child, predict-child).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerRequest {
    pub ticker: String,
}

/// Response for start-job endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAccepted {
    pub status: String,
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl TaskAccepted {
    pub fn new(status: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            task_id: task_id.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Response for prediction endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub result: ResultMap,
}

/// Response for `GET /status/{task_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_seconds: Option<i64>,
}

impl StatusResponse {
    /// Flattens a status record into the polling response shape.
    pub fn new(task_id: impl Into<String>, status: TaskStatus) -> Self {
        let mut response = Self {
            status: status.label().to_string(),
            task_id: task_id.into(),
            result: None,
            error: None,
            completed_at: None,
            failed_at: None,
            elapsed_seconds: status.elapsed_seconds(),
        };
        match status {
            TaskStatus::Running { .. } => {}
            TaskStatus::Completed {
                result,
                completed_at,
            } => {
                response.result = Some(result);
                response.completed_at = Some(completed_at);
            }
            TaskStatus::Failed { error, failed_at } => {
                response.error = Some(error);
                response.failed_at = Some(failed_at);
            }
        }
        response
    }
}

/// Response for `GET /system/cache`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheInfo {
    pub cached_tickers: Vec<String>,
    pub count: usize,
}
