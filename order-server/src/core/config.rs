//! Server configuration
//!
//! Loaded once from environment variables (after `.env`). Unparseable
//! numeric values fall back to their defaults.

use std::time::Duration;

use super::error::ServerError;

/// Which implementation backs the cache or the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Redis,
    Memory,
}

impl Backend {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "redis" => Some(Self::Redis),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// development | staging | production
    pub environment: String,
    pub http_port: u16,

    // Store
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_acquire_timeout: Duration,
    pub store_retry_attempts: u32,
    pub store_retry_delay: Duration,

    // Cache
    pub redis_url: String,
    pub cache_backend: Backend,
    pub cache_capacity: usize,
    pub cache_key_prefix: String,
    pub cache_index_key: String,
    pub cache_op_timeout: Duration,
    pub cache_reconcile_interval: Duration,
    /// Orders loaded into the cache at startup
    pub warm_start_limit: usize,
    pub warm_cache_on_ingest: bool,

    // Channel
    pub channel_backend: Backend,
    pub orders_topic: String,
    pub consumer_group: String,
    pub consumer_name: String,
    pub channel_block: Duration,
    pub redelivery_after: Duration,
    pub topic_provision_attempts: u32,
    pub topic_provision_delay: Duration,
    pub max_batch_size: usize,

    // Logging
    pub log_level: String,
    pub log_json: bool,
    pub log_dir: Option<String>,
}

/// Typed reads over a variable lookup
struct Vars<F>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn raw(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|v| !v.is_empty())
    }

    fn parse_or<T: std::str::FromStr>(&self, name: &str, default: T) -> T {
        self.raw(name)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn string(&self, name: &str, default: &str) -> String {
        self.raw(name).unwrap_or_else(|| default.to_string())
    }

    fn millis(&self, name: &str, default: u64) -> Duration {
        Duration::from_millis(self.parse_or(name, default))
    }

    fn backend(&self, name: &str) -> Result<Backend, ServerError> {
        match self.raw(name) {
            Some(raw) => Backend::parse(&raw).ok_or_else(|| {
                ServerError::Config(format!("{name} must be 'redis' or 'memory', got '{raw}'"))
            }),
            None => Ok(Backend::Redis),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ServerError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from any name → value lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ServerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);
        let environment = vars.string("ENVIRONMENT", "development");
        let is_dev = environment == "development";

        let database_url = vars
            .raw("DATABASE_URL")
            .ok_or_else(|| ServerError::Config("DATABASE_URL must be set".into()))?;

        let cache_capacity: usize = vars.parse_or("CACHE_CAPACITY", 200);
        if cache_capacity == 0 {
            return Err(ServerError::Config("CACHE_CAPACITY must be positive".into()));
        }

        Ok(Self {
            http_port: vars.parse_or("HTTP_PORT", 8080),
            database_url,
            db_max_connections: vars.parse_or("DB_MAX_CONNECTIONS", 10),
            db_acquire_timeout: vars.millis("DB_ACQUIRE_TIMEOUT_MS", 5000),
            store_retry_attempts: vars.parse_or("STORE_RETRY_ATTEMPTS", 3),
            store_retry_delay: vars.millis("STORE_RETRY_DELAY_MS", 100),

            redis_url: vars.string("REDIS_URL", "redis://127.0.0.1:6379"),
            cache_backend: vars.backend("CACHE_BACKEND")?,
            cache_capacity,
            cache_key_prefix: vars.string("CACHE_KEY_PREFIX", "order:"),
            cache_index_key: vars.string("CACHE_INDEX_KEY", "LRU-orders"),
            cache_op_timeout: vars.millis("CACHE_OP_TIMEOUT_MS", 250),
            cache_reconcile_interval: Duration::from_secs(
                vars.parse_or("CACHE_RECONCILE_INTERVAL_SECS", 60),
            ),
            warm_start_limit: vars.parse_or("WARM_START_LIMIT", cache_capacity),
            warm_cache_on_ingest: vars.parse_or("WARM_CACHE_ON_INGEST", false),

            channel_backend: vars.backend("CHANNEL_BACKEND")?,
            orders_topic: vars.string("ORDERS_TOPIC", "orders"),
            consumer_group: vars.string("CONSUMER_GROUP", "orders-group"),
            consumer_name: vars.string("CONSUMER_NAME", "orders-consumer-1"),
            channel_block: vars.millis("CHANNEL_BLOCK_MS", 2000),
            redelivery_after: vars.millis("REDELIVERY_AFTER_MS", 30_000),
            topic_provision_attempts: vars.parse_or("TOPIC_PROVISION_ATTEMPTS", 10),
            topic_provision_delay: vars.millis("TOPIC_PROVISION_DELAY_MS", 5000),
            max_batch_size: vars.parse_or("MAX_BATCH_SIZE", 1000),

            log_level: vars.string("LOG_LEVEL", "info"),
            log_json: vars.parse_or("LOG_JSON", !is_dev),
            log_dir: vars.raw("LOG_DIR"),

            environment,
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, ServerError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!(Backend::parse("redis"), Some(Backend::Redis));
        assert_eq!(Backend::parse(" Memory "), Some(Backend::Memory));
        assert_eq!(Backend::parse("kafka"), None);
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/orders")]).unwrap();
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.cache_capacity, 200);
        assert_eq!(config.warm_start_limit, 200);
        assert_eq!(config.cache_backend, Backend::Redis);
        assert_eq!(config.cache_index_key, "LRU-orders");
        assert_eq!(config.redelivery_after, Duration::from_secs(30));
        assert!(!config.log_json);
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn test_garbage_numbers_fall_back() {
        let config = load(&[
            ("DATABASE_URL", "postgres://localhost/orders"),
            ("HTTP_PORT", "eighty"),
            ("CACHE_CAPACITY", " 5 "),
        ])
        .unwrap();
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.cache_capacity, 5);
        assert_eq!(config.warm_start_limit, 5);
    }

    #[test]
    fn test_production_logs_json() {
        let config = load(&[
            ("DATABASE_URL", "postgres://localhost/orders"),
            ("ENVIRONMENT", "production"),
        ])
        .unwrap();
        assert!(config.is_production());
        assert!(config.log_json);
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        assert!(matches!(load(&[]), Err(ServerError::Config(_))));
        assert!(matches!(
            load(&[("DATABASE_URL", "postgres://x"), ("CACHE_CAPACITY", "0")]),
            Err(ServerError::Config(_))
        ));
        assert!(matches!(
            load(&[("DATABASE_URL", "postgres://x"), ("CHANNEL_BACKEND", "kafka")]),
            Err(ServerError::Config(_))
        ));
    }
}
