//! Fixed-window rate limiting
//!
//! Counts requests per `(bucket, window_index)` using the store's atomic
//! increment, so the limit holds across server instances sharing one store.
//! When the store is unavailable the limiter fails open: availability of the
//! primary function is prioritized over strict enforcement.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde_json::json;
use tracing::warn;

use crate::store::{StateStore, rate_limit_key};

/// Limit configuration for one logical operation bucket.
#[derive(Debug, Clone)]
pub struct RatePolicy {
    pub bucket: &'static str,
    pub limit: i64,
    pub window: Duration,
}

impl RatePolicy {
    pub const fn new(bucket: &'static str, limit: i64, window: Duration) -> Self {
        Self {
            bucket,
            limit,
            window,
        }
    }
}

pub struct RateLimiter {
    store: Arc<dyn StateStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Returns true when the request is within the bucket's limit.
    pub async fn allow(&self, policy: &RatePolicy) -> bool {
        self.allow_at(policy, Utc::now().timestamp()).await
    }

    async fn allow_at(&self, policy: &RatePolicy, now_unix: i64) -> bool {
        if !self.store.is_available().await {
            return true;
        }

        let window_secs = policy.window.as_secs() as i64;
        let key = rate_limit_key(policy.bucket, now_unix / window_secs);

        let count = match self.store.incr(&key).await {
            Ok(count) => count,
            Err(err) => {
                warn!(bucket = policy.bucket, %err, "rate limit check failed, allowing");
                return true;
            }
        };

        // First increment created the key; give it a bounded lifetime even
        // if the process dies before the next line runs (the key is
        // superseded at the next window boundary either way).
        if count == 1 {
            if let Err(err) = self.store.expire(&key, policy.window).await {
                warn!(bucket = policy.bucket, %err, "failed to set rate window expiry");
            }
        }

        count <= policy.limit
    }
}

/// Axum middleware enforcing a [`RatePolicy`] on the wrapped routes.
pub async fn enforce(
    limiter: Arc<RateLimiter>,
    policy: RatePolicy,
    request: Request,
    next: Next,
) -> Response {
    if limiter.allow(&policy).await {
        next.run(request).await
    } else {
        (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"detail": "Rate limit exceeded"})),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RedisStore;
    use crate::store::memory::MemoryStore;

    const POLICY: RatePolicy = RatePolicy::new("train_parent", 3, Duration::from_secs(3600));

    #[tokio::test]
    async fn test_limit_rejected_within_window() {
        let limiter = RateLimiter::new(Arc::new(MemoryStore::new()));
        let now = 1_756_000_000;

        for _ in 0..3 {
            assert!(limiter.allow_at(&POLICY, now).await);
        }
        assert!(!limiter.allow_at(&POLICY, now).await);
    }

    #[tokio::test]
    async fn test_next_window_accepted_again() {
        let limiter = RateLimiter::new(Arc::new(MemoryStore::new()));
        let now = 1_756_000_000;

        for _ in 0..4 {
            limiter.allow_at(&POLICY, now).await;
        }
        assert!(!limiter.allow_at(&POLICY, now).await);

        let next_window = now + 3600;
        assert!(limiter.allow_at(&POLICY, next_window).await);
    }

    #[tokio::test]
    async fn test_buckets_are_independent() {
        let limiter = RateLimiter::new(Arc::new(MemoryStore::new()));
        let other = RatePolicy::new("predict_child", 3, Duration::from_secs(3600));
        let now = 1_756_000_000;

        for _ in 0..4 {
            limiter.allow_at(&POLICY, now).await;
        }
        assert!(!limiter.allow_at(&POLICY, now).await);
        assert!(limiter.allow_at(&other, now).await);
    }

    #[tokio::test]
    async fn test_fail_open_when_store_unavailable() {
        let limiter = RateLimiter::new(Arc::new(RedisStore::disconnected()));
        for _ in 0..100 {
            assert!(limiter.allow(&POLICY).await);
        }
    }
}
