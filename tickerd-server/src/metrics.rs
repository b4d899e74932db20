//! Prometheus metrics
//!
//! Metric names match the original deployment so existing dashboards keep
//! working. The handle is passed around as `Option<Arc<Metrics>>`; an absent
//! handle means metrics emission is a no-op everywhere.

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use tracing::error;

/// `training_status` gauge values.
pub const TRAINING_FAILED: f64 = 0.0;
pub const TRAINING_RUNNING: f64 = 1.0;
pub const TRAINING_COMPLETED: f64 = 2.0;

/// Metrics handle containing all metric instruments.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,

    // State store metrics
    pub redis_up: Gauge,
    pub redis_keys: Gauge,

    // Training metrics
    pub training_status: GaugeVec,
    pub training_mse: Gauge,
    pub training_duration: HistogramVec,

    // Prediction metrics
    pub prediction_total: CounterVec,
    pub prediction_latency: HistogramVec,

    // Cache metrics
    pub cache_hit: CounterVec,
    pub cache_miss: CounterVec,
}

impl Metrics {
    /// Creates and registers all metric instruments.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let redis_up = Gauge::new("redis_up", "Redis up=1/down=0")?;
        let redis_keys = Gauge::new("redis_keys_total", "Number of keys in Redis")?;

        let training_status = GaugeVec::new(
            Opts::new("training_status", "0=failed 1=running 2=completed"),
            &["task_id"],
        )?;
        let training_mse = Gauge::new("training_mse_last", "Last training MSE")?;
        let training_duration = HistogramVec::new(
            HistogramOpts::new("training_duration_seconds", "Training duration in seconds")
                .buckets(prometheus::exponential_buckets(1.0, 2.0, 15)?),
            &["task_id"],
        )?;

        let prediction_total = CounterVec::new(
            Opts::new("prediction_total", "Total predictions"),
            &["type"],
        )?;
        let prediction_latency = HistogramVec::new(
            HistogramOpts::new("prediction_latency_seconds", "Prediction latency"),
            &["type"],
        )?;

        let cache_hit = CounterVec::new(
            Opts::new("redis_cache_hit_total", "Cache hits"),
            &["key"],
        )?;
        let cache_miss = CounterVec::new(
            Opts::new("redis_cache_miss_total", "Cache misses"),
            &["key"],
        )?;

        registry.register(Box::new(redis_up.clone()))?;
        registry.register(Box::new(redis_keys.clone()))?;
        registry.register(Box::new(training_status.clone()))?;
        registry.register(Box::new(training_mse.clone()))?;
        registry.register(Box::new(training_duration.clone()))?;
        registry.register(Box::new(prediction_total.clone()))?;
        registry.register(Box::new(prediction_latency.clone()))?;
        registry.register(Box::new(cache_hit.clone()))?;
        registry.register(Box::new(cache_miss.clone()))?;

        Ok(Self {
            registry,
            redis_up,
            redis_keys,
            training_status,
            training_mse,
            training_duration,
            prediction_total,
            prediction_latency,
            cache_hit,
            cache_miss,
        })
    }

    /// Renders the registry in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(err) = encoder.encode(&self.registry.gather(), &mut buffer) {
            error!(%err, "failed to encode metrics");
            return String::new();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }

    /// Resolves the per-key hit counter (used by tests and the cache).
    pub fn cache_hit_count(&self, key: &str) -> f64 {
        counter_value(&self.cache_hit, key)
    }

    /// Resolves the per-key miss counter (used by tests and the cache).
    pub fn cache_miss_count(&self, key: &str) -> f64 {
        counter_value(&self.cache_miss, key)
    }
}

fn counter_value(vec: &CounterVec, label: &str) -> f64 {
    vec.get_metric_with_label_values(&[label])
        .map(|c: Counter| c.get())
        .unwrap_or(0.0)
}
