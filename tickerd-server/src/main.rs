//! Tickerd Server
//!
//! Control plane for the stock prediction pipeline.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Store: Redis-backed shared state (task status, cache, rate counters)
//! - Tasks: Bounded-concurrency background training jobs
//! - Executor: Subprocess invocation of the Python ML CLI
//! - API: Axum HTTP layer with per-endpoint rate limiting
//!
//! Training runs in the background and clients poll for status; predictions
//! run inline and are cached. The server stays up, in degraded mode, when
//! Redis is unreachable.

mod api;
mod cache;
mod config;
mod executor;
mod metrics;
mod ratelimit;
mod store;
mod tasks;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::AppState;
use crate::cache::PredictionCache;
use crate::config::Config;
use crate::executor::CliExecutor;
use crate::metrics::Metrics;
use crate::ratelimit::RateLimiter;
use crate::store::{RedisStore, StateStore};
use crate::tasks::TaskManager;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tickerd_server=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Tickerd Server");

    // Load configuration
    let config = Config::from_env();
    config.validate().context("Invalid configuration")?;
    info!(
        "Loaded configuration: port={}, redis={}, max_workers={}",
        config.port,
        config.redis_url(),
        config.max_workers
    );

    // Metrics registry
    let metrics = Arc::new(Metrics::new().context("Failed to register metrics")?);

    // Connect to the state store; a failed connection degrades instead of
    // aborting startup.
    let store: Arc<dyn StateStore> = Arc::new(
        RedisStore::connect(&config.redis_url(), Some(Arc::clone(&metrics))).await,
    );
    if store.is_available().await {
        info!("Connected to state store");
    } else {
        warn!("State store unreachable, running in degraded mode");
    }

    // Wire up components
    let executor = Arc::new(CliExecutor::new(&config));
    let cache = Arc::new(PredictionCache::new(
        Arc::clone(&store),
        Some(Arc::clone(&metrics)),
        config.cache_ttl,
    ));
    let tasks = Arc::new(TaskManager::new(
        config.max_workers,
        Arc::clone(&store),
        executor.clone(),
        Some(Arc::clone(&metrics)),
    ));
    let limiter = Arc::new(RateLimiter::new(Arc::clone(&store)));

    let state = AppState {
        tasks: Arc::clone(&tasks),
        cache,
        store,
        executor,
        limiter,
        metrics: Some(metrics),
    };

    // Build router with all API endpoints
    let app = api::create_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Let in-flight training jobs finish before the process exits.
    info!(
        "Draining background tasks (up to {:?})",
        config.graceful_timeout
    );
    if tasks.shutdown(config.graceful_timeout).await {
        info!("All background tasks finished");
    } else {
        warn!("Shutdown timeout reached with tasks still running");
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", err);
        // Fall back to never resolving; the server runs until killed.
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
