//! In-process cache backend
//!
//! Value map and recency index sit behind one mutex; each backend call holds
//! it for the duration of a single operation and never across an await.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::CacheError;
use super::backend::{CacheBackend, ReconcileReport};
use super::recency::{RecencyIndex, ScoredKey};

#[derive(Default)]
struct Inner {
    values: HashMap<String, String>,
    index: RecencyIndex,
}

#[derive(Default)]
pub struct MemoryCacheBackend {
    inner: Mutex<Inner>,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys from least to most recent
    #[cfg(test)]
    pub(crate) fn keys_by_recency(&self) -> Vec<String> {
        self.inner.lock().index.keys().map(str::to_string).collect()
    }

    #[cfg(test)]
    pub(crate) fn insert_orphan_value(&self, key: &str, value: &str) {
        self.inner
            .lock()
            .values
            .insert(key.to_string(), value.to_string());
    }

    #[cfg(test)]
    pub(crate) fn insert_orphan_score(&self, key: &str, score: i64) {
        self.inner.lock().index.set(key, score);
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.inner.lock().values.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str, score: i64) -> Result<(), CacheError> {
        let mut inner = self.inner.lock();
        inner.values.insert(key.to_string(), value.to_string());
        inner.index.set(key, score);
        Ok(())
    }

    async fn touch(&self, key: &str, score: i64) -> Result<bool, CacheError> {
        Ok(self.inner.lock().index.touch(key, score))
    }

    async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        let mut inner = self.inner.lock();
        let had_value = inner.values.remove(key).is_some();
        let had_score = inner.index.remove(key).is_some();
        Ok(had_value || had_score)
    }

    async fn cardinality(&self) -> Result<usize, CacheError> {
        Ok(self.inner.lock().index.len())
    }

    async fn pop_min_over(&self, capacity: usize) -> Result<Option<ScoredKey>, CacheError> {
        let mut inner = self.inner.lock();
        if inner.index.len() <= capacity {
            return Ok(None);
        }
        let victim = inner.index.pop_min();
        if let Some(v) = &victim {
            inner.values.remove(&v.key);
        }
        Ok(victim)
    }

    async fn reconcile(&self) -> Result<ReconcileReport, CacheError> {
        let mut inner = self.inner.lock();
        let Inner { values, index } = &mut *inner;

        let orphan_scores: Vec<String> = index
            .keys()
            .filter(|k| !values.contains_key(*k))
            .map(str::to_string)
            .collect();
        for key in &orphan_scores {
            index.remove(key);
        }

        let before = values.len();
        values.retain(|k, _| index.contains(k));

        Ok(ReconcileReport {
            orphan_scores: orphan_scores.len(),
            orphan_values: before - values.len(),
        })
    }
}
