/// Update ID cache
///
/// Telegram redelivers an update when the webhook is slow to answer, and the
/// panelist flow can take minutes. Every update ID is recorded for a while so
/// a redelivery is dropped instead of evaluated twice.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::config::BotKind;

#[async_trait]
pub trait UpdateCache: Send + Sync {
    /// Record `key` and report whether it had already been recorded
    async fn mark_seen(&self, key: &str) -> Result<bool>;
}

/// Cache key for one bot's update ID
pub fn update_key(kind: BotKind, update_id: i64) -> String {
    format!("{}_update_id:{}", kind, update_id)
}

/// Redis-backed cache, shared across processes
pub struct RedisUpdateCache {
    connection: redis::aio::MultiplexedConnection,
    ttl: Duration,
}

impl RedisUpdateCache {
    pub async fn connect(redis_url: &str, ttl: Duration) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Invalid REDIS_URL")?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to connect to Redis")?;

        log::info!("Update ID cache backed by Redis (ttl {}s)", ttl.as_secs());
        Ok(Self { connection, ttl })
    }
}

#[async_trait]
impl UpdateCache for RedisUpdateCache {
    async fn mark_seen(&self, key: &str) -> Result<bool> {
        let mut connection = self.connection.clone();

        // SET ... GET returns the previous value, nil when the key was absent
        let previous: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(1)
            .arg("EX")
            .arg(self.ttl.as_secs().max(1))
            .arg("GET")
            .query_async(&mut connection)
            .await
            .context("Failed to record update ID in Redis")?;

        Ok(previous.is_some())
    }
}

/// In-process cache for single-instance deployments and tests
pub struct MemoryUpdateCache {
    entries: Arc<RwLock<HashMap<String, Instant>>>,
    ttl: Duration,
}

impl MemoryUpdateCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl UpdateCache for MemoryUpdateCache {
    async fn mark_seen(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        entries.retain(|_, expires_at| *expires_at > now);

        let seen = entries.contains_key(key);
        entries.insert(key.to_string(), now + self.ttl);
        Ok(seen)
    }
}

/// Pick the Redis cache when a URL is configured
pub async fn build_update_cache(redis_url: Option<&str>, ttl: Duration) -> Result<Arc<dyn UpdateCache>> {
    match redis_url {
        Some(url) => Ok(Arc::new(RedisUpdateCache::connect(url, ttl).await?)),
        None => {
            log::warn!("REDIS_URL not set - update IDs are only deduplicated within this process");
            Ok(Arc::new(MemoryUpdateCache::new(ttl)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_key_is_namespaced_per_bot() {
        assert_eq!(update_key(BotKind::Panelist, 42), "panelist_update_id:42");
        assert_eq!(update_key(BotKind::Prefect, 42), "prefect_update_id:42");
    }

    #[tokio::test]
    async fn test_memory_cache_reports_repeat() {
        let cache = MemoryUpdateCache::new(Duration::from_secs(60));
        assert!(!cache.mark_seen("panelist_update_id:1").await.unwrap());
        assert!(cache.mark_seen("panelist_update_id:1").await.unwrap());
        assert!(!cache.mark_seen("prefect_update_id:1").await.unwrap());
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_memory_cache_forgets_after_ttl() {
        let cache = MemoryUpdateCache::new(Duration::from_millis(20));
        assert!(!cache.mark_seen("k").await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!cache.mark_seen("k").await.unwrap());
        assert_eq!(cache.len().await, 1);
    }
}
