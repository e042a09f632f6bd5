//! Recency clock and in-memory recency index

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};

/// Process-wide source of strictly increasing recency scores
///
/// Scores are Unix milliseconds, bumped by one whenever the wall clock has
/// not advanced past the previous score.
#[derive(Debug, Default)]
pub struct RecencyClock {
    last: AtomicI64,
}

impl RecencyClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> i64 {
        let now = shared::util::now_millis();
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(prev + 1);
            match self.last.compare_exchange_weak(
                prev,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(actual) => prev = actual,
            }
        }
    }
}

/// A key popped from the recency index together with its score
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredKey {
    pub key: String,
    pub score: i64,
}

/// Ordered set of `(score, key)` with a reverse lookup by key
///
/// Equal scores order by key bytes, the same order a Redis sorted set uses.
#[derive(Debug, Default)]
pub struct RecencyIndex {
    by_score: BTreeSet<(i64, String)>,
    by_key: HashMap<String, i64>,
}

impl RecencyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or move `key` to `score`
    pub fn set(&mut self, key: &str, score: i64) {
        if let Some(old) = self.by_key.insert(key.to_string(), score) {
            self.by_score.remove(&(old, key.to_string()));
        }
        self.by_score.insert((score, key.to_string()));
    }

    /// Move an existing key; returns false when the key is not indexed
    pub fn touch(&mut self, key: &str, score: i64) -> bool {
        if !self.by_key.contains_key(key) {
            return false;
        }
        self.set(key, score);
        true
    }

    pub fn remove(&mut self, key: &str) -> Option<i64> {
        let score = self.by_key.remove(key)?;
        self.by_score.remove(&(score, key.to_string()));
        Some(score)
    }

    pub fn score(&self, key: &str) -> Option<i64> {
        self.by_key.get(key).copied()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Remove and return the least recent key
    pub fn pop_min(&mut self) -> Option<ScoredKey> {
        let (score, key) = self.by_score.pop_first()?;
        self.by_key.remove(&key);
        Some(ScoredKey { key, score })
    }

    /// Keys from least to most recent
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.by_score.iter().map(|(_, k)| k.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_strictly_increasing() {
        let clock = RecencyClock::new();
        let mut prev = clock.next();
        for _ in 0..10_000 {
            let next = clock.next();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn test_pop_min_returns_oldest() {
        let mut index = RecencyIndex::new();
        index.set("a", 10);
        index.set("b", 5);
        index.set("c", 20);

        assert_eq!(index.pop_min().unwrap().key, "b");
        assert_eq!(index.pop_min().unwrap().key, "a");
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_equal_scores_break_ties_by_key() {
        let mut index = RecencyIndex::new();
        index.set("zeta", 7);
        index.set("alpha", 7);
        index.set("mid", 7);

        let order: Vec<&str> = index.keys().collect();
        assert_eq!(order, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_set_moves_existing_key() {
        let mut index = RecencyIndex::new();
        index.set("a", 1);
        index.set("b", 2);
        index.set("a", 3);

        assert_eq!(index.len(), 2);
        assert_eq!(index.score("a"), Some(3));
        assert_eq!(index.pop_min().unwrap().key, "b");
    }

    #[test]
    fn test_touch_ignores_unknown_key() {
        let mut index = RecencyIndex::new();
        assert!(!index.touch("ghost", 1));
        assert!(index.is_empty());

        index.set("a", 1);
        assert!(index.touch("a", 9));
        assert_eq!(index.score("a"), Some(9));
    }

    #[test]
    fn test_remove_clears_both_sides() {
        let mut index = RecencyIndex::new();
        index.set("a", 1);
        assert_eq!(index.remove("a"), Some(1));
        assert_eq!(index.remove("a"), None);
        assert!(index.pop_min().is_none());
        assert!(!index.contains("a"));
    }
}
