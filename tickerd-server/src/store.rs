//! Shared state store
//!
//! Wraps the networked key/value store used for task status, the prediction
//! cache, and rate-limit counters. The store is best-effort: it can be down
//! at startup (bounded connection retries, then degraded mode) or disappear
//! mid-session, and every caller has a defined behavior for that case.
//!
//! Key formats are a compatibility surface; existing deployments and tooling
//! inspect the store directly, so they must not change.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use thiserror::Error;
use tracing::{info, warn};

use crate::metrics::Metrics;

/// Prefix for cached prediction entries.
pub const CACHE_KEY_PREFIX: &str = "predict_child_";

/// Store key for a task status record.
pub fn task_key(task_id: &str) -> String {
    format!("task_status:{task_id}")
}

/// Store key for a cached prediction. Callers pass an already
/// lower-cased ticker.
pub fn cache_key(ticker: &str) -> String {
    format!("{CACHE_KEY_PREFIX}{ticker}")
}

/// Store key for a rate-limit window counter.
pub fn rate_limit_key(bucket: &str, window_index: i64) -> String {
    format!("rate_limit:{bucket}:{window_index}")
}

/// Errors from state store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store was never reached or the connection is gone.
    #[error("state store is unavailable")]
    Unavailable,

    #[error(transparent)]
    Redis(#[from] redis::RedisError),

    #[error("failed to encode value: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Primitive operations over the shared key/value store.
///
/// The trait seam lets the task manager, cache, and rate limiter be
/// exercised against an in-memory store in tests.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Returns the value at `key`, or `None` if the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Stores `value` at `key` with the given expiry.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Atomically increments the counter at `key`, creating it at 1.
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;

    /// Sets the expiry of an existing key.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Lists keys matching a glob pattern (e.g. `predict_child_*`).
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Deletes a key. Deleting a missing key is not an error.
    async fn del(&self, key: &str) -> Result<(), StoreError>;

    /// Removes every key in the store.
    async fn flush_all(&self) -> Result<(), StoreError>;

    /// Total number of keys in the store.
    async fn key_count(&self) -> Result<u64, StoreError>;

    /// Liveness probe.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Per-call liveness check used to bypass store-dependent logic.
    async fn is_available(&self) -> bool {
        self.ping().await.is_ok()
    }
}

/// Redis-backed store.
///
/// Holds a `ConnectionManager` which reconnects on its own after transient
/// failures. If the initial connection never succeeds the handle is degraded:
/// every operation returns [`StoreError::Unavailable`] and the rest of the
/// system runs without caching, rate limiting, or task persistence.
pub struct RedisStore {
    conn: Option<ConnectionManager>,
    metrics: Option<Arc<Metrics>>,
}

const CONNECT_ATTEMPTS: u32 = 10;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(5);

impl RedisStore {
    /// Connects with bounded retries; on exhaustion returns a degraded handle
    /// instead of failing startup.
    pub async fn connect(url: &str, metrics: Option<Arc<Metrics>>) -> Self {
        for attempt in 1..=CONNECT_ATTEMPTS {
            match Self::try_connect(url).await {
                Ok(conn) => {
                    info!(url, "connected to state store");
                    if let Some(m) = &metrics {
                        m.redis_up.set(1.0);
                    }
                    return Self {
                        conn: Some(conn),
                        metrics,
                    };
                }
                Err(err) => {
                    warn!(
                        attempt,
                        max_attempts = CONNECT_ATTEMPTS,
                        %err,
                        "state store connection attempt failed"
                    );
                    if attempt < CONNECT_ATTEMPTS {
                        tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                    }
                }
            }
        }
        warn!("giving up on state store connection; running degraded");
        if let Some(m) = &metrics {
            m.redis_up.set(0.0);
        }
        Self {
            conn: None,
            metrics,
        }
    }

    /// A handle that was never connected. Every operation returns
    /// [`StoreError::Unavailable`].
    pub fn disconnected() -> Self {
        Self {
            conn: None,
            metrics: None,
        }
    }

    async fn try_connect(url: &str) -> Result<ConnectionManager, redis::RedisError> {
        let client = redis::Client::open(url)?;
        ConnectionManager::new(client).await
    }

    fn conn(&self) -> Result<ConnectionManager, StoreError> {
        self.conn.clone().ok_or(StoreError::Unavailable)
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn()?;
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()).await?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn()?;
        Ok(conn.incr(key, 1).await?)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        conn.expire::<_, ()>(key, ttl.as_secs() as i64).await?;
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn()?;
        Ok(conn.keys(pattern).await?)
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn flush_all(&self) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        redis::cmd("FLUSHALL").query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn key_count(&self) -> Result<u64, StoreError> {
        let mut conn = self.conn()?;
        let count = redis::cmd("DBSIZE").query_async::<u64>(&mut conn).await?;
        if let Some(m) = &self.metrics {
            m.redis_keys.set(count as f64);
        }
        Ok(count)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let result = async {
            let mut conn = self.conn()?;
            redis::cmd("PING").query_async::<String>(&mut conn).await?;
            Ok::<_, StoreError>(())
        }
        .await;
        if let Some(m) = &self.metrics {
            m.redis_up.set(if result.is_ok() { 1.0 } else { 0.0 });
        }
        result
    }
}
