//! Prediction result cache
//!
//! Short-circuits repeated prediction requests for the same ticker within
//! the TTL window. The cache is a performance layer only: when the backing
//! store is unavailable every operation degrades to a no-op instead of
//! surfacing an error.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use tickerd_core::ResultMap;

use crate::metrics::Metrics;
use crate::store::{CACHE_KEY_PREFIX, StateStore, StoreError, cache_key};

pub struct PredictionCache {
    store: Arc<dyn StateStore>,
    metrics: Option<Arc<Metrics>>,
    ttl: Duration,
}

impl PredictionCache {
    pub fn new(
        store: Arc<dyn StateStore>,
        metrics: Option<Arc<Metrics>>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            metrics,
            ttl,
        }
    }

    /// Looks up the cached result for a ticker. A miss (including a store
    /// failure or an unparseable entry) returns `None`.
    pub async fn get(&self, ticker: &str) -> Option<ResultMap> {
        let key = cache_key(&ticker.to_lowercase());

        let raw = match self.store.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) | Err(_) => {
                self.count_miss(&key);
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(data) => {
                self.count_hit(&key);
                Some(data)
            }
            Err(err) => {
                warn!(key, %err, "discarding unparseable cache entry");
                self.count_miss(&key);
                None
            }
        }
    }

    /// Stores a result under the ticker's key, overwriting silently.
    pub async fn set(&self, ticker: &str, data: &ResultMap) -> Result<(), StoreError> {
        let key = cache_key(&ticker.to_lowercase());
        let payload = serde_json::to_string(data)?;
        match self.store.set(&key, &payload, self.ttl).await {
            Err(StoreError::Unavailable) => Ok(()),
            other => other,
        }
    }

    /// Removes the cached result for a ticker.
    pub async fn delete(&self, ticker: &str) -> Result<(), StoreError> {
        let key = cache_key(&ticker.to_lowercase());
        match self.store.del(&key).await {
            Err(StoreError::Unavailable) => Ok(()),
            other => other,
        }
    }

    /// Lists tickers with a cached result, upper-cased by convention.
    pub async fn cached_tickers(&self) -> Result<Vec<String>, StoreError> {
        let keys = match self.store.keys(&format!("{CACHE_KEY_PREFIX}*")).await {
            Ok(keys) => keys,
            Err(StoreError::Unavailable) => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        Ok(keys
            .iter()
            .filter_map(|key| key.strip_prefix(CACHE_KEY_PREFIX))
            .map(str::to_uppercase)
            .collect())
    }

    fn count_hit(&self, key: &str) {
        if let Some(m) = &self.metrics {
            m.cache_hit.with_label_values(&[key]).inc();
        }
    }

    fn count_miss(&self, key: &str) {
        if let Some(m) = &self.metrics {
            m.cache_miss.with_label_values(&[key]).inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RedisStore;
    use crate::store::memory::MemoryStore;
    use serde_json::json;

    fn result_map(value: serde_json::Value) -> ResultMap {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn cache_with_metrics(store: Arc<dyn StateStore>) -> (PredictionCache, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new().unwrap());
        let cache = PredictionCache::new(store, Some(metrics.clone()), Duration::from_secs(60));
        (cache, metrics)
    }

    #[tokio::test]
    async fn test_set_then_get_round_trip() {
        let (cache, metrics) = cache_with_metrics(Arc::new(MemoryStore::new()));
        let data = result_map(json!({"prediction": 187.2, "mse": 0.02}));

        cache.set("MSFT", &data).await.unwrap();
        assert_eq!(cache.get("msft").await, Some(data));
        assert_eq!(metrics.cache_hit_count("predict_child_msft"), 1.0);
        assert_eq!(metrics.cache_miss_count("predict_child_msft"), 0.0);
    }

    #[tokio::test]
    async fn test_miss_counts_exactly_once() {
        let (cache, metrics) = cache_with_metrics(Arc::new(MemoryStore::new()));
        assert_eq!(cache.get("AAPL").await, None);
        assert_eq!(metrics.cache_miss_count("predict_child_aapl"), 1.0);
        assert_eq!(metrics.cache_hit_count("predict_child_aapl"), 0.0);
    }

    #[tokio::test]
    async fn test_unparseable_entry_is_a_miss() {
        let store = Arc::new(MemoryStore::new());
        store
            .set("predict_child_aapl", "not json", Duration::from_secs(60))
            .await
            .unwrap();
        let (cache, metrics) = cache_with_metrics(store);
        assert_eq!(cache.get("AAPL").await, None);
        assert_eq!(metrics.cache_miss_count("predict_child_aapl"), 1.0);
    }

    #[tokio::test]
    async fn test_cached_tickers_upper_cased() {
        let (cache, _) = cache_with_metrics(Arc::new(MemoryStore::new()));
        cache
            .set("msft", &result_map(json!({"a": 1})))
            .await
            .unwrap();
        cache
            .set("AAPL", &result_map(json!({"b": 2})))
            .await
            .unwrap();

        let mut tickers = cache.cached_tickers().await.unwrap();
        tickers.sort();
        assert_eq!(tickers, vec!["AAPL", "MSFT"]);
    }

    #[tokio::test]
    async fn test_delete() {
        let (cache, _) = cache_with_metrics(Arc::new(MemoryStore::new()));
        cache.set("tsla", &result_map(json!({"p": 1}))).await.unwrap();
        cache.delete("TSLA").await.unwrap();
        assert_eq!(cache.get("tsla").await, None);
    }

    #[tokio::test]
    async fn test_unavailable_store_degrades_to_noop() {
        let (cache, _) = cache_with_metrics(Arc::new(RedisStore::disconnected()));
        assert_eq!(cache.get("AAPL").await, None);
        assert!(cache.set("AAPL", &ResultMap::new()).await.is_ok());
        assert!(cache.delete("AAPL").await.is_ok());
        assert_eq!(cache.cached_tickers().await.unwrap(), Vec::<String>::new());
    }
}
