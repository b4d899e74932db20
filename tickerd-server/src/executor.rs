//! Job execution
//!
//! The server never trains or predicts anything itself; it shells out to the
//! ML CLI and treats each invocation as an opaque unit of work with a
//! JSON-shaped result. The [`JobExecutor`] trait is the seam that lets the
//! task manager and handlers be tested with stub executors.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use tickerd_core::ResultMap;

use crate::config::Config;

/// Longest error detail kept from subprocess output.
const MAX_ERROR_LEN: usize = 2000;

/// Errors from executing an ML CLI command
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The command exceeded its deadline and was killed.
    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    /// The CLI reported an error in its JSON output.
    #[error("{0}")]
    Job(String),

    /// The command exited non-zero without a structured error.
    #[error("command failed: {0}")]
    Failed(String),

    /// The command exited zero but did not print a JSON object.
    #[error("invalid JSON output: {0}")]
    InvalidOutput(String),

    #[error("failed to launch command: {0}")]
    Spawn(#[from] std::io::Error),
}

impl ExecutorError {
    /// True when the error indicates a model that has not been trained yet,
    /// which handlers use to trigger auto-training.
    pub fn indicates_missing_model(&self) -> bool {
        let message = self.to_string().to_lowercase();
        message.contains("missing") || message.contains("not found")
    }
}

/// Capability for running training and prediction jobs.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Trains the parent model.
    async fn train_parent(&self) -> Result<ResultMap, ExecutorError>;

    /// Trains the child model for one ticker.
    async fn train_child(&self, ticker: &str) -> Result<ResultMap, ExecutorError>;

    /// Runs a prediction with the parent model.
    async fn predict_parent(&self) -> Result<ResultMap, ExecutorError>;

    /// Runs a prediction with a ticker's child model.
    async fn predict_child(&self, ticker: &str) -> Result<ResultMap, ExecutorError>;
}

/// Executor that invokes the Python ML CLI as a subprocess.
pub struct CliExecutor {
    python: String,
    script: String,
    exec_timeout: Duration,
    training_timeout: Duration,
}

impl CliExecutor {
    pub fn new(config: &Config) -> Self {
        Self {
            python: config.python_path.clone(),
            script: config.script_path.clone(),
            exec_timeout: config.exec_timeout,
            training_timeout: config.training_timeout,
        }
    }

    /// Runs `{python} {script} <args...>` and parses stdout as a JSON object.
    async fn run(&self, timeout: Duration, args: &[&str]) -> Result<ResultMap, ExecutorError> {
        debug!(?args, "running ML CLI command");

        let mut command = Command::new(&self.python);
        command
            .arg(&self.script)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(timeout, command.output()).await {
            Ok(result) => result?,
            Err(_) => return Err(ExecutorError::Timeout(timeout)),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.trim();

        let data = if stdout.is_empty() {
            None
        } else {
            match serde_json::from_str::<serde_json::Value>(stdout) {
                Ok(serde_json::Value::Object(map)) => Some(map),
                _ if output.status.success() => {
                    return Err(ExecutorError::InvalidOutput(truncate(stdout)));
                }
                _ => None,
            }
        };

        // The CLI reports its own failures as {"error": "..."} regardless
        // of exit code.
        if let Some(map) = &data {
            if let Some(serde_json::Value::String(message)) = map.get("error") {
                return Err(ExecutorError::Job(message.clone()));
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            let message = if stderr.is_empty() {
                output.status.to_string()
            } else {
                stderr.to_string()
            };
            return Err(ExecutorError::Failed(truncate(&message)));
        }

        Ok(data.unwrap_or_default())
    }
}

#[async_trait]
impl JobExecutor for CliExecutor {
    async fn train_parent(&self) -> Result<ResultMap, ExecutorError> {
        self.run(self.training_timeout, &["train-parent"]).await
    }

    async fn train_child(&self, ticker: &str) -> Result<ResultMap, ExecutorError> {
        self.run(self.training_timeout, &["train-child", "--ticker", ticker])
            .await
    }

    async fn predict_parent(&self) -> Result<ResultMap, ExecutorError> {
        self.run(self.exec_timeout, &["predict-parent"]).await
    }

    async fn predict_child(&self, ticker: &str) -> Result<ResultMap, ExecutorError> {
        self.run(self.exec_timeout, &["predict-child", "--ticker", ticker])
            .await
    }
}

fn truncate(message: &str) -> String {
    if message.len() <= MAX_ERROR_LEN {
        return message.to_string();
    }
    let mut end = MAX_ERROR_LEN;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &message[..end])
}
