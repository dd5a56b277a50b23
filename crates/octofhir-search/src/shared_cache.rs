//! Shared Redis tier of the result cache.
//!
//! Keys:
//! - `{prefix}:entry:{canonical query}` holds an rmp-encoded [`SharedEntry`], written with `SET EX`
//! - `{prefix}:type:{resource type}` is a set of entry keys that read that type; its expiry is
//!   pushed out to the entry TTL on every add
//!
//! Invalidating a type deletes every member of its set plus the set itself. Any Redis error is
//! logged and treated as a miss; after an error the tier is skipped until `retry_after` passes.
//! Entries carry their creation time, and the local tier ignores one created before a write it
//! missed while Redis was skipped.

use deadpool_redis::Pool;
use parking_lot::Mutex;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::{CacheSettings, RedisSettings};
use crate::engine::SearchResult;
use crate::query_cache::ResultCache;

#[derive(Debug, Error)]
pub enum SharedCacheError {
    #[error("Failed to create Redis pool: {0}")]
    CreatePool(#[from] deadpool_redis::CreatePoolError),

    #[error("Redis connection error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Failed to encode cache entry: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Failed to decode cache entry: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// What the shared tier stores per query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedEntry {
    pub result: SearchResult,
    pub depends_on: Vec<String>,
    /// Microseconds since the Unix epoch.
    pub created_at: i64,
}

pub struct SharedCache {
    pool: Pool,
    key_prefix: String,
    ttl_secs: u64,
    retry_after: Duration,
    unavailable_until: Mutex<Option<Instant>>,
}

impl std::fmt::Debug for SharedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedCache")
            .field("key_prefix", &self.key_prefix)
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}

impl SharedCache {
    /// Create the pool and check that a connection can be made.
    pub async fn connect(settings: &RedisSettings, ttl_secs: u64) -> Result<Self, SharedCacheError> {
        let timeout = Some(Duration::from_millis(settings.timeout_ms));
        let mut redis_config = deadpool_redis::Config::from_url(&settings.url);
        let mut pool_config = deadpool_redis::PoolConfig::new(settings.pool_size);
        pool_config.timeouts.wait = timeout;
        pool_config.timeouts.create = timeout;
        pool_config.timeouts.recycle = timeout;
        redis_config.pool = Some(pool_config);

        let pool = redis_config.create_pool(Some(deadpool_redis::Runtime::Tokio1))?;
        // Test connection
        drop(pool.get().await?);

        Ok(Self {
            pool,
            key_prefix: settings.key_prefix.clone(),
            ttl_secs,
            retry_after: Duration::from_secs(settings.retry_after_secs),
            unavailable_until: Mutex::new(None),
        })
    }

    fn entry_key(&self, key: &str) -> String {
        format!("{}:entry:{key}", self.key_prefix)
    }

    fn type_key(&self, resource_type: &str) -> String {
        format!("{}:type:{resource_type}", self.key_prefix)
    }

    fn is_available(&self) -> bool {
        let mut until = self.unavailable_until.lock();
        match *until {
            Some(t) if Instant::now() < t => false,
            Some(_) => {
                *until = None;
                true
            }
            None => true,
        }
    }

    fn mark_unavailable(&self, op: &str, error: &SharedCacheError) {
        tracing::warn!(op = %op, error = %error, retry_after_secs = self.retry_after.as_secs(), "Redis cache tier unavailable");
        *self.unavailable_until.lock() = Some(Instant::now() + self.retry_after);
    }

    pub async fn get(&self, key: &str) -> Option<SharedEntry> {
        if !self.is_available() {
            return None;
        }
        match self.try_get(key).await {
            Ok(entry) => entry,
            Err(SharedCacheError::Decode(e)) => {
                tracing::warn!(key = %key, error = %e, "discarding undecodable shared cache entry");
                None
            }
            Err(e) => {
                self.mark_unavailable("GET", &e);
                None
            }
        }
    }

    async fn try_get(&self, key: &str) -> Result<Option<SharedEntry>, SharedCacheError> {
        let mut conn = self.pool.get().await?;
        let data: Option<Vec<u8>> = conn.get(self.entry_key(key)).await?;
        match data {
            Some(bytes) => Ok(Some(rmp_serde::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn set(&self, key: &str, entry: &SharedEntry) {
        if !self.is_available() {
            return;
        }
        if let Err(e) = self.try_set(key, entry).await {
            self.mark_unavailable("SET", &e);
        }
    }

    async fn try_set(&self, key: &str, entry: &SharedEntry) -> Result<(), SharedCacheError> {
        let data = rmp_serde::to_vec(entry)?;
        let type_keys: Vec<String> = entry.depends_on.iter().map(|t| self.type_key(t)).collect();
        let pipe = store_pipeline(&self.entry_key(key), data, &type_keys, self.ttl_secs);
        let mut conn = self.pool.get().await?;
        let () = pipe.query_async(&mut conn).await?;
        tracing::debug!(key = %key, ttl_secs = self.ttl_secs, "cache set (shared)");
        Ok(())
    }

    /// Remove every shared entry that read `resource_type`. Returns how many were removed.
    pub async fn invalidate(&self, resource_type: &str) -> usize {
        if !self.is_available() {
            return 0;
        }
        match self.try_invalidate(resource_type).await {
            Ok(n) => n,
            Err(e) => {
                self.mark_unavailable("DEL", &e);
                0
            }
        }
    }

    async fn try_invalidate(&self, resource_type: &str) -> Result<usize, SharedCacheError> {
        let type_key = self.type_key(resource_type);
        let mut conn = self.pool.get().await?;
        let members: Vec<String> = conn.smembers(&type_key).await?;
        let removed = members.len();
        let mut keys = members;
        keys.push(type_key);
        conn.del::<_, ()>(keys).await?;
        Ok(removed)
    }
}

/// `SET EX` the entry, then add it to each type set and extend the set's expiry to match.
fn store_pipeline(entry_key: &str, data: Vec<u8>, type_keys: &[String], ttl_secs: u64) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic().set_ex(entry_key, data, ttl_secs).ignore();
    for type_key in type_keys {
        pipe.sadd(type_key, entry_key)
            .ignore()
            .expire(type_key, ttl_secs as i64)
            .ignore();
    }
    pipe
}

/// Build the result cache the process shares across queries.
///
/// Returns `None` when caching is disabled. A Redis tier that cannot be reached leaves a
/// working local-only cache.
pub async fn create_result_cache(
    cache: &CacheSettings,
    redis: &RedisSettings,
) -> Option<Arc<ResultCache>> {
    if !cache.enabled {
        tracing::info!("result cache disabled");
        return None;
    }

    let local = ResultCache::new(cache);
    if !redis.enabled {
        tracing::info!(max_entries = cache.max_entries, "Redis disabled, using local result cache only");
        return Some(Arc::new(local));
    }

    tracing::info!(url = %redis.url, "Connecting to Redis");
    match SharedCache::connect(redis, cache.ttl_secs).await {
        Ok(shared) => {
            tracing::info!("connected to Redis, using two-tier result cache");
            Some(Arc::new(local.with_shared(shared)))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to connect to Redis. Falling back to local cache.");
            Some(Arc::new(local))
        }
    }
}
