//! Order snapshot cache
//!
//! - [`CacheEngine`]: LRU policy, timeouts and counters
//! - [`CacheBackend`]: atomic value + recency operations
//! - [`MemoryCacheBackend`] / [`RedisCacheBackend`]: backing stores

mod backend;
mod engine;
mod memory;
mod recency;
mod redis_backend;
mod stats;

use std::time::Duration;
use thiserror::Error;

pub use backend::{CacheBackend, ReconcileReport};
pub use engine::{CacheEngine, CacheLookup};
pub use memory::MemoryCacheBackend;
pub use recency::{RecencyClock, RecencyIndex, ScoredKey};
pub use redis_backend::RedisCacheBackend;
pub use stats::{CacheStats, CacheStatsSnapshot};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("Cache operation timed out after {0:?}")]
    Timeout(Duration),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Unavailable(err.to_string())
    }
}
