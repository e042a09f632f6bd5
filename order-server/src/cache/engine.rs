//! Bounded LRU cache over a [`CacheBackend`]
//!
//! Values are serialized order snapshots keyed by `order_uid`. Recency is a
//! side index of millisecond scores; the least recent key is evicted first.
//!
//! Capacity is enforced after each fill by popping one victim at a time, each
//! pop conditional on the index still being over capacity. Concurrent fills
//! may therefore leave the index above capacity by at most the number of
//! fills in flight; it converges back once those fills finish enforcing.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::CacheError;
use super::backend::{CacheBackend, ReconcileReport};
use super::recency::RecencyClock;
use super::stats::{CacheStats, CacheStatsSnapshot};

/// Outcome of a cache lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    Hit(String),
    Miss,
}

impl CacheLookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }
}

pub struct CacheEngine {
    backend: Arc<dyn CacheBackend>,
    clock: RecencyClock,
    capacity: usize,
    op_timeout: Duration,
    stats: CacheStats,
}

impl CacheEngine {
    pub fn new(backend: Arc<dyn CacheBackend>, capacity: usize, op_timeout: Duration) -> Self {
        Self {
            backend,
            clock: RecencyClock::new(),
            capacity,
            op_timeout,
            stats: CacheStats::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    /// Run one backend call under the operation timeout
    async fn call<T, F>(&self, op: &'static str, fut: F) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, CacheError>>,
    {
        let result = match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(r) => r,
            Err(_) => Err(CacheError::Timeout(self.op_timeout)),
        };
        if let Err(e) = &result {
            CacheStats::incr(&self.stats.backend_errors);
            tracing::debug!(op, backend = self.backend.name(), error = %e, "Cache backend call failed");
        }
        result
    }

    /// Store `value` under `key` as the most recent entry, then enforce capacity
    pub async fn fill(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let score = self.clock.next();
        self.call("put", self.backend.put(key, value, score)).await?;
        CacheStats::incr(&self.stats.fills);

        if let Err(e) = self.enforce_capacity().await {
            tracing::warn!(key = %key, error = %e, "Capacity enforcement failed, cache may be over capacity");
        }
        Ok(())
    }

    /// Look up `key`, refreshing its recency on a hit
    pub async fn get(&self, key: &str) -> Result<CacheLookup, CacheError> {
        let Some(value) = self.call("get", self.backend.get(key)).await? else {
            CacheStats::incr(&self.stats.misses);
            return Ok(CacheLookup::Miss);
        };
        CacheStats::incr(&self.stats.hits);

        let score = self.clock.next();
        match self.call("touch", self.backend.touch(key, score)).await {
            Ok(true) => {}
            // evicted between read and refresh; the value read is still valid
            Ok(false) => tracing::debug!(key = %key, "Hit key left the index before refresh"),
            Err(e) => {
                CacheStats::incr(&self.stats.recency_refresh_failures);
                tracing::warn!(key = %key, error = %e, "Recency refresh failed");
            }
        }
        Ok(CacheLookup::Hit(value))
    }

    /// Remove `key` from value store and index. Idempotent.
    pub async fn evict(&self, key: &str) -> Result<bool, CacheError> {
        let removed = self.call("remove", self.backend.remove(key)).await?;
        if removed {
            CacheStats::incr(&self.stats.evictions);
        }
        Ok(removed)
    }

    /// Pop least recent keys until the index is within capacity
    ///
    /// Returns the number of evicted keys.
    pub async fn enforce_capacity(&self) -> Result<usize, CacheError> {
        let mut evicted = 0;
        while let Some(victim) = self
            .call("pop_min_over", self.backend.pop_min_over(self.capacity))
            .await?
        {
            tracing::debug!(key = %victim.key, score = victim.score, "Evicted least recent order");
            CacheStats::incr(&self.stats.evictions);
            evicted += 1;
        }
        Ok(evicted)
    }

    /// Drop orphaned scores and values, then re-run capacity enforcement
    pub async fn reconcile(&self) -> Result<ReconcileReport, CacheError> {
        let report = self.call("reconcile", self.backend.reconcile()).await?;
        if !report.is_clean() {
            CacheStats::add(
                &self.stats.evictions,
                (report.orphan_scores + report.orphan_values) as u64,
            );
            tracing::warn!(
                orphan_scores = report.orphan_scores,
                orphan_values = report.orphan_values,
                "Cache reconciliation removed orphaned entries"
            );
        }
        self.enforce_capacity().await?;
        Ok(report)
    }

    /// Current number of indexed keys
    pub async fn len(&self) -> Result<usize, CacheError> {
        self.call("cardinality", self.backend.cardinality()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheBackend;
    use crate::cache::recency::ScoredKey;
    use async_trait::async_trait;

    fn engine(capacity: usize) -> (CacheEngine, Arc<MemoryCacheBackend>) {
        let backend = Arc::new(MemoryCacheBackend::new());
        let engine = CacheEngine::new(backend.clone(), capacity, Duration::from_millis(250));
        (engine, backend)
    }

    #[tokio::test]
    async fn test_capacity_two_evicts_oldest() {
        let (cache, _) = engine(2);
        cache.fill("A", "a").await.unwrap();
        cache.fill("B", "b").await.unwrap();
        cache.fill("C", "c").await.unwrap();

        assert_eq!(cache.get("A").await.unwrap(), CacheLookup::Miss);
        assert_eq!(cache.get("C").await.unwrap(), CacheLookup::Hit("c".into()));
        assert_eq!(cache.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_get_refreshes_recency() {
        let (cache, _) = engine(3);
        cache.fill("keep", "k").await.unwrap();
        cache.fill("x", "1").await.unwrap();
        cache.fill("y", "2").await.unwrap();

        assert!(cache.get("keep").await.unwrap().is_hit());

        for i in 0..3 {
            cache.fill(&format!("other-{i}"), "v").await.unwrap();
            if i < 2 {
                assert!(cache.get("keep").await.unwrap().is_hit());
            }
        }
        assert!(cache.get("keep").await.unwrap().is_hit());
        assert_eq!(cache.get("x").await.unwrap(), CacheLookup::Miss);
    }

    #[tokio::test]
    async fn test_hit_survives_fills_that_evict_older_keys() {
        let (cache, backend) = engine(3);
        cache.fill("key", "v").await.unwrap();
        cache.fill("a", "1").await.unwrap();
        cache.fill("b", "2").await.unwrap();

        assert!(cache.get("key").await.unwrap().is_hit());
        cache.fill("c", "3").await.unwrap();
        cache.fill("d", "4").await.unwrap();

        assert_eq!(backend.keys_by_recency(), vec!["key", "c", "d"]);
    }

    #[tokio::test]
    async fn test_index_never_exceeds_capacity_sequentially() {
        let (cache, backend) = engine(5);
        for i in 0..50 {
            cache.fill(&format!("k{i}"), "v").await.unwrap();
            assert!(cache.len().await.unwrap() <= 5);
        }
        assert_eq!(
            backend.keys_by_recency(),
            vec!["k45", "k46", "k47", "k48", "k49"]
        );
        assert_eq!(cache.stats().evictions, 45);
    }

    #[tokio::test]
    async fn test_refill_overwrites_value() {
        let (cache, _) = engine(2);
        cache.fill("A", "old").await.unwrap();
        cache.fill("A", "new").await.unwrap();
        assert_eq!(cache.get("A").await.unwrap(), CacheLookup::Hit("new".into()));
        assert_eq!(cache.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_evict_is_idempotent() {
        let (cache, _) = engine(2);
        cache.fill("A", "a").await.unwrap();
        assert!(cache.evict("A").await.unwrap());
        assert!(!cache.evict("A").await.unwrap());
        assert_eq!(cache.get("A").await.unwrap(), CacheLookup::Miss);
    }

    #[tokio::test]
    async fn test_concurrent_fills_converge_to_capacity() {
        let (cache, _) = engine(10);
        let cache = Arc::new(cache);
        let mut handles = Vec::new();
        for i in 0..100 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.fill(&format!("k{i}"), "v").await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(cache.len().await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_reconcile_enforces_capacity() {
        let (cache, backend) = engine(1);
        backend.insert_orphan_score("ghost", 1);
        backend.put("a", "1", 2).await.unwrap();
        backend.put("b", "2", 3).await.unwrap();

        let report = cache.reconcile().await.unwrap();
        assert_eq!(report.orphan_scores, 1);
        assert_eq!(backend.keys_by_recency(), vec!["b".to_string()]);
    }

    /// Backend whose refresh always fails
    struct NoTouch(MemoryCacheBackend);

    #[async_trait]
    impl CacheBackend for NoTouch {
        fn name(&self) -> &'static str {
            "no-touch"
        }
        async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
            self.0.get(key).await
        }
        async fn put(&self, key: &str, value: &str, score: i64) -> Result<(), CacheError> {
            self.0.put(key, value, score).await
        }
        async fn touch(&self, _key: &str, _score: i64) -> Result<bool, CacheError> {
            Err(CacheError::Unavailable("touch disabled".into()))
        }
        async fn remove(&self, key: &str) -> Result<bool, CacheError> {
            self.0.remove(key).await
        }
        async fn cardinality(&self) -> Result<usize, CacheError> {
            self.0.cardinality().await
        }
        async fn pop_min_over(&self, capacity: usize) -> Result<Option<ScoredKey>, CacheError> {
            self.0.pop_min_over(capacity).await
        }
        async fn reconcile(&self) -> Result<ReconcileReport, CacheError> {
            self.0.reconcile().await
        }
    }

    #[tokio::test]
    async fn test_failed_refresh_still_returns_value() {
        let cache = CacheEngine::new(
            Arc::new(NoTouch(MemoryCacheBackend::new())),
            2,
            Duration::from_millis(250),
        );
        cache.fill("A", "a").await.unwrap();
        assert_eq!(cache.get("A").await.unwrap(), CacheLookup::Hit("a".into()));

        let stats = cache.stats();
        assert_eq!(stats.recency_refresh_failures, 1);
        assert_eq!(stats.backend_errors, 1);
    }

    /// Backend that never answers
    struct Stalled;

    #[async_trait]
    impl CacheBackend for Stalled {
        fn name(&self) -> &'static str {
            "stalled"
        }
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            std::future::pending().await
        }
        async fn put(&self, _: &str, _: &str, _: i64) -> Result<(), CacheError> {
            std::future::pending().await
        }
        async fn touch(&self, _: &str, _: i64) -> Result<bool, CacheError> {
            std::future::pending().await
        }
        async fn remove(&self, _: &str) -> Result<bool, CacheError> {
            std::future::pending().await
        }
        async fn cardinality(&self) -> Result<usize, CacheError> {
            std::future::pending().await
        }
        async fn pop_min_over(&self, _: usize) -> Result<Option<ScoredKey>, CacheError> {
            std::future::pending().await
        }
        async fn reconcile(&self) -> Result<ReconcileReport, CacheError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_stalled_backend_times_out() {
        let cache = CacheEngine::new(Arc::new(Stalled), 2, Duration::from_millis(20));
        assert!(matches!(
            cache.get("A").await,
            Err(CacheError::Timeout(_))
        ));
        assert!(matches!(
            cache.fill("A", "a").await,
            Err(CacheError::Timeout(_))
        ));
    }
}
