//! Server configuration
//!
//! All parameters come from environment variables with sensible defaults,
//! so the server can start with no configuration at all in development.

use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen port
    pub port: u16,

    /// State store connection settings
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_db: u32,

    /// Interpreter and entrypoint of the ML CLI
    pub python_path: String,
    pub script_path: String,

    /// Timeout for prediction CLI calls
    pub exec_timeout: Duration,

    /// Timeout for training CLI calls (these can run for hours)
    pub training_timeout: Duration,

    /// Max background training jobs per server instance
    pub max_workers: usize,

    /// TTL for cached prediction results
    pub cache_ttl: Duration,

    /// How long shutdown waits for in-flight jobs
    pub graceful_timeout: Duration,
}

impl Config {
    /// Reads configuration from environment variables.
    ///
    /// Recognized variables (all optional):
    /// - PORT (default: 8000)
    /// - REDIS_HOST / REDIS_PORT / REDIS_DB (default: localhost / 6379 / 0)
    /// - PYTHON_PATH / SCRIPT_PATH (default: python / scripts/ml_cli.py)
    /// - PYTHON_TIMEOUT (seconds, default: 120)
    /// - TRAINING_TIMEOUT (seconds, default: 7200)
    /// - MAX_WORKERS (default: 4)
    /// - CACHE_TTL (seconds, default: 86400)
    /// - GRACEFUL_TIMEOUT (seconds, default: 30)
    pub fn from_env() -> Self {
        Self {
            port: env_parse("PORT", 8000),
            redis_host: env_or("REDIS_HOST", "localhost"),
            redis_port: env_parse("REDIS_PORT", 6379),
            redis_db: env_parse("REDIS_DB", 0),
            python_path: env_or("PYTHON_PATH", "python"),
            script_path: env_or("SCRIPT_PATH", "scripts/ml_cli.py"),
            exec_timeout: Duration::from_secs(env_parse("PYTHON_TIMEOUT", 120)),
            training_timeout: Duration::from_secs(env_parse("TRAINING_TIMEOUT", 7200)),
            max_workers: env_parse("MAX_WORKERS", 4),
            cache_ttl: Duration::from_secs(env_parse("CACHE_TTL", 86_400)),
            graceful_timeout: Duration::from_secs(env_parse("GRACEFUL_TIMEOUT", 30)),
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_workers == 0 {
            anyhow::bail!("max_workers must be greater than 0");
        }
        if self.exec_timeout.is_zero() || self.training_timeout.is_zero() {
            anyhow::bail!("execution timeouts must be greater than 0");
        }
        if self.cache_ttl.is_zero() {
            anyhow::bail!("cache_ttl must be greater than 0");
        }
        if self.python_path.is_empty() || self.script_path.is_empty() {
            anyhow::bail!("python_path and script_path cannot be empty");
        }
        Ok(())
    }

    /// Connection URL for the state store.
    pub fn redis_url(&self) -> String {
        format!(
            "redis://{}:{}/{}",
            self.redis_host, self.redis_port, self.redis_db
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8000,
            redis_host: "localhost".to_string(),
            redis_port: 6379,
            redis_db: 0,
            python_path: "python".to_string(),
            script_path: "scripts/ml_cli.py".to_string(),
            exec_timeout: Duration::from_secs(120),
            training_timeout: Duration::from_secs(7200),
            max_workers: 4,
            cache_ttl: Duration::from_secs(86_400),
            graceful_timeout: Duration::from_secs(30),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.exec_timeout, Duration::from_secs(120));
        assert_eq!(config.cache_ttl, Duration::from_secs(86_400));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.max_workers = 0;
        assert!(config.validate().is_err());

        config.max_workers = 4;
        config.script_path = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_redis_url() {
        let config = Config::default();
        assert_eq!(config.redis_url(), "redis://localhost:6379/0");
    }
}
