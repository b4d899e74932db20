//! Task status lifecycle
//!
//! A task status record is the single source of truth for one background
//! training job. It lives in the shared state store so it survives process
//! restarts and is readable by any server instance.

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque JSON-shaped result produced by a job.
pub type ResultMap = serde_json::Map<String, serde_json::Value>;

/// Timestamp format used inside status records.
///
/// Kept as a plain formatted string for compatibility with existing
/// deployments and tooling that inspects the store directly.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Lifecycle record of one background job.
///
/// Exactly one variant holds at any observed instant; the tagged
/// representation makes "both result and error set" unrepresentable.
/// Serialized form: `{"status":"running","start_time":"..."}` etc.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskStatus {
    Running {
        start_time: String,
    },
    Completed {
        result: ResultMap,
        completed_at: String,
    },
    Failed {
        error: String,
        failed_at: String,
    },
}

impl TaskStatus {
    /// A `running` record stamped with the current time.
    pub fn running_now() -> Self {
        TaskStatus::Running {
            start_time: now_stamp(),
        }
    }

    /// A `completed` record stamped with the current time.
    pub fn completed_now(result: ResultMap) -> Self {
        TaskStatus::Completed {
            result,
            completed_at: now_stamp(),
        }
    }

    /// A `failed` record stamped with the current time.
    pub fn failed_now(error: impl Into<String>) -> Self {
        TaskStatus::Failed {
            error: error.into(),
            failed_at: now_stamp(),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, TaskStatus::Running { .. })
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_running()
    }

    /// The wire label of the variant ("running", "completed", "failed").
    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Running { .. } => "running",
            TaskStatus::Completed { .. } => "completed",
            TaskStatus::Failed { .. } => "failed",
        }
    }

    /// Seconds elapsed since the job started, for running records whose
    /// start time parses. Terminal records return `None`.
    pub fn elapsed_seconds(&self) -> Option<i64> {
        let TaskStatus::Running { start_time } = self else {
            return None;
        };
        let started = NaiveDateTime::parse_from_str(start_time, TIMESTAMP_FORMAT).ok()?;
        Some((Utc::now() - started.and_utc()).num_seconds())
    }
}

fn now_stamp() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}
