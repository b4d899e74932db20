//! Background task management
//!
//! Runs training jobs off the request path under a per-process concurrency
//! cap, with durable status in the shared state store and an optional
//! continuation executed after a successful job.
//!
//! The status record in the store is the single source of truth: there is
//! no in-memory status, so any server instance (or a restarted one) answers
//! polls from the same data. The semaphore, by contrast, is deliberately
//! process-local; with several instances sharing one store the global
//! concurrency can exceed `max_workers` (a documented per-instance soft cap).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use tickerd_core::{ResultMap, TaskStatus};

use crate::executor::{ExecutorError, JobExecutor};
use crate::metrics::{self, Metrics};
use crate::store::{StateStore, StoreError, task_key};

/// Fixed logical id of the parent-model training job.
pub const PARENT_TASK_ID: &str = "parent_training";

/// Status TTLs: long enough for slow pollers, short enough to bound
/// store growth.
const RUNNING_TTL: Duration = Duration::from_secs(2 * 60 * 60);
const TERMINAL_TTL: Duration = Duration::from_secs(60 * 60);

/// Continuation executed on the worker after a successful job, before the
/// completed status is written. Its failures never affect the job's
/// recorded outcome.
pub type ChainFn = Box<dyn FnOnce() -> ChainFuture + Send>;
pub type ChainFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

type JobFuture = Pin<Box<dyn Future<Output = Result<ResultMap, ExecutorError>> + Send>>;

/// Result of asking the manager to start a job.
///
/// `AlreadyRunning` and `Busy` are load-shedding decisions, not errors:
/// callers answer "try again later" instead of failing the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
    Busy,
}

impl StartOutcome {
    pub fn started(self) -> bool {
        matches!(self, StartOutcome::Started)
    }
}

pub struct TaskManager {
    store: Arc<dyn StateStore>,
    executor: Arc<dyn JobExecutor>,
    metrics: Option<Arc<Metrics>>,
    slots: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    drained: Arc<Notify>,
}

impl TaskManager {
    pub fn new(
        max_workers: usize,
        store: Arc<dyn StateStore>,
        executor: Arc<dyn JobExecutor>,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self {
            store,
            executor,
            metrics,
            slots: Arc::new(Semaphore::new(max_workers)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            drained: Arc::new(Notify::new()),
        }
    }

    /// Reads a task's status record from the store.
    ///
    /// Returns `None` when the store is unreachable, no record exists, or
    /// the stored record does not parse (logged, treated as absent).
    pub async fn status(&self, task_id: &str) -> Option<TaskStatus> {
        let raw = match self.store.get(&task_key(task_id)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(StoreError::Unavailable) => return None,
            Err(err) => {
                warn!(task_id, %err, "failed to read task status");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(status) => Some(status),
            Err(err) => {
                warn!(task_id, %err, "discarding malformed task status record");
                None
            }
        }
    }

    /// Point-in-time check, not a lock: a job can finish between this read
    /// and whatever the caller does next.
    pub async fn is_running(&self, task_id: &str) -> bool {
        matches!(self.status(task_id).await, Some(status) if status.is_running())
    }

    /// Starts parent-model training in the background.
    pub async fn start_train_parent(&self) -> StartOutcome {
        let executor = Arc::clone(&self.executor);
        self.start(
            PARENT_TASK_ID.to_string(),
            Box::pin(async move { executor.train_parent().await }),
            None,
        )
        .await
    }

    /// Starts child-model training for `task_id` (a lower-cased ticker),
    /// with an optional post-success continuation.
    pub async fn start_train_child(&self, task_id: &str, chain: Option<ChainFn>) -> StartOutcome {
        let executor = Arc::clone(&self.executor);
        let ticker = task_id.to_string();
        self.start(
            task_id.to_string(),
            Box::pin(async move { executor.train_child(&ticker).await }),
            chain,
        )
        .await
    }

    async fn start(&self, task_id: String, job: JobFuture, chain: Option<ChainFn>) -> StartOutcome {
        if self.is_running(&task_id).await {
            return StartOutcome::AlreadyRunning;
        }

        // Non-blocking acquire: no free slot means shed the request, the
        // caller polls and retries. Also fails once shutdown has closed
        // the semaphore.
        let permit = match Arc::clone(&self.slots).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => return StartOutcome::Busy,
        };

        let ctx = JobContext {
            task_id,
            store: Arc::clone(&self.store),
            metrics: self.metrics.clone(),
        };
        ctx.save_status(&TaskStatus::running_now(), RUNNING_TTL).await;
        ctx.set_status_gauge(metrics::TRAINING_RUNNING);

        self.supervise(ctx.clone(), permit, tokio::spawn(run_job(ctx, job, chain)));
        StartOutcome::Started
    }

    /// Awaits the worker, releases its slot unconditionally, and converts a
    /// worker panic into a terminal failed status instead of losing it.
    fn supervise(&self, ctx: JobContext, permit: OwnedSemaphorePermit, worker: JoinHandle<()>) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let in_flight = Arc::clone(&self.in_flight);
        let drained = Arc::clone(&self.drained);

        tokio::spawn(async move {
            let outcome = worker.await;
            drop(permit);

            if let Err(err) = outcome {
                if err.is_panic() {
                    let message = panic_message(err.into_panic());
                    error!(task_id = %ctx.task_id, message, "training task panicked");
                    ctx.save_status(
                        &TaskStatus::failed_now(format!("job panicked: {message}")),
                        TERMINAL_TTL,
                    )
                    .await;
                    ctx.set_status_gauge(metrics::TRAINING_FAILED);
                }
            }

            in_flight.fetch_sub(1, Ordering::SeqCst);
            drained.notify_waiters();
        });
    }

    /// Stops accepting new jobs and waits for in-flight ones.
    ///
    /// Returns true if the pool drained before the deadline.
    pub async fn shutdown(&self, deadline: Duration) -> bool {
        self.slots.close();
        let deadline = tokio::time::Instant::now() + deadline;
        loop {
            let notified = self.drained.notified();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.in_flight.load(Ordering::SeqCst) == 0;
            }
        }
    }
}

/// The worker body. All outcomes are written to the store; nothing is
/// propagated to the caller that started the job.
async fn run_job(ctx: JobContext, job: JobFuture, chain: Option<ChainFn>) {
    let started = tokio::time::Instant::now();

    match job.await {
        Err(err) => {
            error!(task_id = %ctx.task_id, %err, "training task failed");
            ctx.save_status(&TaskStatus::failed_now(err.to_string()), TERMINAL_TTL)
                .await;
            ctx.set_status_gauge(metrics::TRAINING_FAILED);
        }
        Ok(result) => {
            if let Some(chain) = chain {
                // Run on a separate task so a chain panic cannot take the
                // worker down with it; the job already succeeded.
                match tokio::spawn(chain()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        warn!(task_id = %ctx.task_id, %err, "chained step failed")
                    }
                    Err(err) => {
                        warn!(task_id = %ctx.task_id, %err, "chained step panicked")
                    }
                }
            }

            let elapsed = started.elapsed();
            ctx.record_success(&result, elapsed).await;
            info!(
                task_id = %ctx.task_id,
                elapsed_secs = elapsed.as_secs(),
                "training task completed"
            );
        }
    }
}

/// Everything a worker needs to record its outcome.
#[derive(Clone)]
struct JobContext {
    task_id: String,
    store: Arc<dyn StateStore>,
    metrics: Option<Arc<Metrics>>,
}

impl JobContext {
    async fn save_status(&self, status: &TaskStatus, ttl: Duration) {
        let payload = match serde_json::to_string(status) {
            Ok(payload) => payload,
            Err(err) => {
                error!(task_id = %self.task_id, %err, "failed to encode task status");
                return;
            }
        };
        match self.store.set(&task_key(&self.task_id), &payload, ttl).await {
            Ok(()) => {}
            // Degraded mode: pollers will see "unknown" until the store
            // comes back.
            Err(StoreError::Unavailable) => {}
            Err(err) => {
                warn!(task_id = %self.task_id, %err, "failed to persist task status")
            }
        }
    }

    async fn record_success(&self, result: &ResultMap, elapsed: Duration) {
        self.save_status(&TaskStatus::completed_now(result.clone()), TERMINAL_TTL)
            .await;
        if let Some(m) = &self.metrics {
            m.training_status
                .with_label_values(&[&self.task_id])
                .set(metrics::TRAINING_COMPLETED);
            m.training_duration
                .with_label_values(&[&self.task_id])
                .observe(elapsed.as_secs_f64());
            if let Some(mse) = result.get("mse").and_then(serde_json::Value::as_f64) {
                m.training_mse.set(mse);
            }
        }
    }

    fn set_status_gauge(&self, value: f64) {
        if let Some(m) = &self.metrics {
            m.training_status
                .with_label_values(&[&self.task_id])
                .set(value);
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
