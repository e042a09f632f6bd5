//! Cache backing store abstraction
//!
//! A backend owns two structures: a key/value map of serialized snapshots and
//! a sorted recency index. Every method is a single atomic step against both,
//! so the engine never observes a value without a score or the reverse.

use async_trait::async_trait;

use super::CacheError;
use super::recency::ScoredKey;

/// Result of a reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ReconcileReport {
    /// Scores whose value was missing (removed)
    pub orphan_scores: usize,
    /// Values that had no score (removed)
    pub orphan_values: usize,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.orphan_scores == 0 && self.orphan_values == 0
    }
}

#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Write the value and set its score in one step
    async fn put(&self, key: &str, value: &str, score: i64) -> Result<(), CacheError>;

    /// Update the score of an indexed key; false when the key is not indexed
    async fn touch(&self, key: &str, score: i64) -> Result<bool, CacheError>;

    /// Delete value and score; true when anything was removed
    async fn remove(&self, key: &str) -> Result<bool, CacheError>;

    /// Number of keys in the recency index
    async fn cardinality(&self) -> Result<usize, CacheError>;

    /// Pop the least recent key and delete its value, only while the index
    /// holds more than `capacity` keys
    async fn pop_min_over(&self, capacity: usize) -> Result<Option<ScoredKey>, CacheError>;

    /// Drop orphaned scores and orphaned values
    async fn reconcile(&self) -> Result<ReconcileReport, CacheError>;
}
