//! Redis cache backend
//!
//! Snapshots live under `{prefix}{order_uid}` as plain strings; recency lives
//! in one sorted set. Multi-key steps run as MULTI/EXEC pipelines or Lua
//! scripts so each trait call stays atomic on the server.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

use super::CacheError;
use super::backend::{CacheBackend, ReconcileReport};
use super::recency::ScoredKey;

const SCAN_BATCH: usize = 200;

/// ZADD only when the member is already indexed
const TOUCH_LUA: &str = r#"
if redis.call('ZSCORE', KEYS[1], ARGV[2]) then
    redis.call('ZADD', KEYS[1], ARGV[1], ARGV[2])
    return 1
end
return 0
"#;

/// Pop one victim while over capacity and delete its value
const POP_OVER_LUA: &str = r#"
if redis.call('ZCARD', KEYS[1]) <= tonumber(ARGV[1]) then
    return false
end
local popped = redis.call('ZPOPMIN', KEYS[1])
if #popped == 0 then
    return false
end
redis.call('DEL', ARGV[2] .. popped[1])
return popped
"#;

const DROP_ORPHAN_SCORE_LUA: &str = r#"
if redis.call('EXISTS', KEYS[2]) == 0 then
    return redis.call('ZREM', KEYS[1], ARGV[1])
end
return 0
"#;

const DROP_ORPHAN_VALUE_LUA: &str = r#"
if not redis.call('ZSCORE', KEYS[1], ARGV[1]) then
    return redis.call('DEL', KEYS[2])
end
return 0
"#;

pub struct RedisCacheBackend {
    conn: ConnectionManager,
    key_prefix: String,
    index_key: String,
    touch_script: Script,
    pop_script: Script,
    orphan_score_script: Script,
    orphan_value_script: Script,
}

impl RedisCacheBackend {
    pub async fn connect(
        url: &str,
        key_prefix: impl Into<String>,
        index_key: impl Into<String>,
    ) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn, key_prefix, index_key))
    }

    pub fn new(
        conn: ConnectionManager,
        key_prefix: impl Into<String>,
        index_key: impl Into<String>,
    ) -> Self {
        Self {
            conn,
            key_prefix: key_prefix.into(),
            index_key: index_key.into(),
            touch_script: Script::new(TOUCH_LUA),
            pop_script: Script::new(POP_OVER_LUA),
            orphan_score_script: Script::new(DROP_ORPHAN_SCORE_LUA),
            orphan_value_script: Script::new(DROP_ORPHAN_VALUE_LUA),
        }
    }

    fn value_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn scan_value_keys(&self) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", self.key_prefix);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(keys)
    }
}

#[async_trait]
impl CacheBackend for RedisCacheBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(self.value_key(key)).await?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: &str, score: i64) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .set(self.value_key(key), value)
            .ignore()
            .zadd(&self.index_key, key, score)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn touch(&self, key: &str, score: i64) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let updated: i64 = self
            .touch_script
            .key(&self.index_key)
            .arg(score)
            .arg(key)
            .invoke_async(&mut conn)
            .await?;
        Ok(updated == 1)
    }

    async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let (deleted, unscored): (i64, i64) = redis::pipe()
            .atomic()
            .del(self.value_key(key))
            .zrem(&self.index_key, key)
            .query_async(&mut conn)
            .await?;
        Ok(deleted + unscored > 0)
    }

    async fn cardinality(&self) -> Result<usize, CacheError> {
        let mut conn = self.conn.clone();
        let count: usize = conn.zcard(&self.index_key).await?;
        Ok(count)
    }

    async fn pop_min_over(&self, capacity: usize) -> Result<Option<ScoredKey>, CacheError> {
        let mut conn = self.conn.clone();
        let popped: Option<(String, f64)> = self
            .pop_script
            .key(&self.index_key)
            .arg(capacity)
            .arg(&self.key_prefix)
            .invoke_async(&mut conn)
            .await?;
        Ok(popped.map(|(key, score)| ScoredKey {
            key,
            score: score as i64,
        }))
    }

    async fn reconcile(&self) -> Result<ReconcileReport, CacheError> {
        let mut conn = self.conn.clone();
        let mut report = ReconcileReport::default();

        let members: Vec<String> = conn.zrange(&self.index_key, 0, -1).await?;
        for member in &members {
            let removed: i64 = self
                .orphan_score_script
                .key(&self.index_key)
                .key(self.value_key(member))
                .arg(member)
                .invoke_async(&mut conn)
                .await?;
            report.orphan_scores += removed as usize;
        }

        for value_key in self.scan_value_keys().await? {
            let Some(member) = value_key.strip_prefix(&self.key_prefix) else {
                continue;
            };
            let removed: i64 = self
                .orphan_value_script
                .key(&self.index_key)
                .key(&value_key)
                .arg(member)
                .invoke_async(&mut conn)
                .await?;
            report.orphan_values += removed as usize;
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn backend() -> RedisCacheBackend {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        RedisCacheBackend::connect(&url, format!("test-order:{suffix}:"), format!("test-lru:{suffix}"))
            .await
            .unwrap()
    }

    #[tokio::test]
    #[ignore = "requires a running Redis (REDIS_URL)"]
    async fn test_put_touch_pop() {
        let backend = backend().await;
        backend.put("a", "{}", 1).await.unwrap();
        backend.put("b", "{}", 2).await.unwrap();
        assert!(backend.touch("a", 3).await.unwrap());
        assert!(!backend.touch("ghost", 4).await.unwrap());
        assert_eq!(backend.cardinality().await.unwrap(), 2);

        let victim = backend.pop_min_over(1).await.unwrap().unwrap();
        assert_eq!(victim.key, "b");
        assert_eq!(victim.score, 2);
        assert_eq!(backend.get("b").await.unwrap(), None);
        assert_eq!(backend.pop_min_over(1).await.unwrap(), None);

        assert!(backend.remove("a").await.unwrap());
        assert_eq!(backend.cardinality().await.unwrap(), 0);
    }

    #[tokio::test]
    #[ignore = "requires a running Redis (REDIS_URL)"]
    async fn test_reconcile_drops_orphans() {
        let backend = backend().await;
        backend.put("kept", "{}", 1).await.unwrap();

        let mut conn = backend.conn.clone();
        let _: () = conn.set(backend.value_key("stray"), "{}").await.unwrap();
        let _: () = conn.zadd(&backend.index_key, "ghost", 5).await.unwrap();

        let report = backend.reconcile().await.unwrap();
        assert_eq!(report.orphan_scores, 1);
        assert_eq!(report.orphan_values, 1);
        assert_eq!(backend.cardinality().await.unwrap(), 1);

        backend.remove("kept").await.unwrap();
    }
}
