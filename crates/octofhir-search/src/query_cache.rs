//! Search result caching.
//!
//! ## Design
//!
//! - **Cache Key**: the canonical query string ([`CacheKey::canonical`]), so argument order
//!   does not matter
//! - **Cache Value**: the [`SearchResult`] plus the resource types the query read
//! - **Local tier**: size-bounded LRU with a per-entry TTL behind a `parking_lot::Mutex`
//! - **Shared tier**: optional Redis, see [`crate::shared_cache`]
//! - **Invalidation**: a write to type `T` drops every entry that read `T`
//! - **Write log**: per-type generation and last-write time. A result computed before a write
//!   is not stored after it, and a shared entry older than a write of a type it read is ignored
//!
//! ## Example
//!
//! ```ignore
//! let key = CacheKey::canonical("Patient", &raw, 10, 0);
//! if let Some(hit) = cache.get(&key).await {
//!     return Ok((*hit).clone());
//! }
//! let observed = cache.generations(query.referenced_types());
//! let result = run_search().await?;
//! cache.set(key, result, observed).await;
//! ```

use dashmap::DashMap;
use lru::LruCache;
use octofhir_core::now_utc;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use url::form_urlencoded;

use crate::config::CacheSettings;
use crate::engine::SearchResult;
use crate::parser::RawQuery;
use crate::shared_cache::{SharedCache, SharedEntry};

/// One in this many insertions sweeps expired entries.
const CLEANUP_PROBABILITY: u32 = 64;

/// Canonical form of a search request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// `Type?k=v&k=v&@limit=n&@offset=m`, pairs sorted by key then value and form-urlencoded.
    pub fn canonical(resource_type: &str, raw: &RawQuery, limit: u32, offset: u32) -> Self {
        let mut pairs: Vec<(&str, &str)> = raw
            .iter()
            .flat_map(|(k, values)| values.iter().map(move |v| (k.as_str(), v.as_str())))
            .collect();
        pairs.sort_unstable();

        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (k, v) in pairs {
            serializer.append_pair(k, v);
        }
        serializer.append_pair("@limit", &limit.to_string());
        serializer.append_pair("@offset", &offset.to_string());
        Self(format!("{resource_type}?{}", serializer.finish()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cache statistics for monitoring.
#[derive(Debug, Default)]
pub struct CacheStatistics {
    /// Number of cache hits
    pub hits: AtomicU64,
    /// Number of cache misses
    pub misses: AtomicU64,
    /// Entries dropped for capacity or age
    pub evictions: AtomicU64,
    /// Number of insertions
    pub insertions: AtomicU64,
    /// Entries dropped by writes
    pub invalidations: AtomicU64,
    /// Current local size
    pub size: AtomicUsize,
}

impl CacheStatistics {
    /// Calculate hit ratio.
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let misses = self.misses.load(Ordering::Relaxed) as f64;
        let total = hits + misses;

        if total == 0.0 { 0.0 } else { hits / total }
    }

    /// Get a snapshot of current statistics.
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            insertions: self.insertions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            size: self.size.load(Ordering::Relaxed),
            hit_ratio: self.hit_ratio(),
        }
    }
}

/// A point-in-time snapshot of cache statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub insertions: u64,
    pub invalidations: u64,
    pub size: usize,
    pub hit_ratio: f64,
}

/// Microseconds since the Unix epoch.
pub(crate) fn now_micros() -> i64 {
    (now_utc().unix_timestamp_nanos() / 1_000) as i64
}

#[derive(Debug, Clone, Copy, Default)]
struct WriteMark {
    generation: u64,
    at_micros: i64,
}

/// Writes seen by this process, per resource type.
#[derive(Debug, Default)]
struct WriteLog(DashMap<String, WriteMark>);

impl WriteLog {
    fn record(&self, resource_type: &str) {
        let mut mark = self.0.entry(resource_type.to_string()).or_default();
        mark.generation += 1;
        mark.at_micros = now_micros();
    }

    fn generation(&self, resource_type: &str) -> u64 {
        self.0.get(resource_type).map_or(0, |m| m.generation)
    }

    /// Whether any of `types` was written at or after `micros`.
    fn written_since(&self, types: &[String], micros: i64) -> bool {
        types
            .iter()
            .any(|t| self.0.get(t).is_some_and(|m| m.at_micros >= micros))
    }
}

/// Write generations of the types a query reads, taken before it reads the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generations(Vec<(String, u64)>);

impl Generations {
    pub fn types(&self) -> Vec<String> {
        self.0.iter().map(|(t, _)| t.clone()).collect()
    }
}

#[derive(Debug)]
struct LocalEntry {
    value: Arc<SearchResult>,
    depends_on: Vec<String>,
    inserted_at: Instant,
}

/// Two-tier search result cache: local LRU plus optional shared Redis.
#[derive(Debug)]
pub struct ResultCache {
    local: Mutex<LruCache<String, LocalEntry>>,
    ttl: Duration,
    shared: Option<SharedCache>,
    writes: WriteLog,
    stats: CacheStatistics,
}

impl ResultCache {
    pub fn new(settings: &CacheSettings) -> Self {
        Self::local(settings.max_entries, Duration::from_secs(settings.ttl_secs))
    }

    /// Local-only cache holding at most `capacity` entries for `ttl` each.
    pub fn local(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            local: Mutex::new(LruCache::new(capacity)),
            ttl,
            shared: None,
            writes: WriteLog::default(),
            stats: CacheStatistics::default(),
        }
    }

    pub fn with_shared(mut self, shared: SharedCache) -> Self {
        self.shared = Some(shared);
        self
    }

    pub fn has_shared_tier(&self) -> bool {
        self.shared.is_some()
    }

    pub async fn get(&self, key: &CacheKey) -> Option<Arc<SearchResult>> {
        {
            let mut local = self.local.lock();
            let found = local
                .get(key.as_str())
                .map(|e| (e.inserted_at.elapsed() <= self.ttl, Arc::clone(&e.value)));
            match found {
                Some((true, value)) => {
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(key = %key, "cache hit (local)");
                    return Some(value);
                }
                Some((false, _)) => {
                    local.pop(key.as_str());
                    self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                    self.stats.size.store(local.len(), Ordering::Relaxed);
                }
                None => {}
            }
        }

        if let Some(shared) = &self.shared
            && let Some(entry) = shared.get(key.as_str()).await
        {
            let value = Arc::new(entry.result);
            let fresh = self.insert_local_if(key, Arc::clone(&value), entry.depends_on, |deps| {
                !self.writes.written_since(deps, entry.created_at)
            });
            if fresh {
                tracing::debug!(key = %key, "cache hit (shared)");
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Some(value);
            }
            tracing::debug!(key = %key, "shared entry predates a write; ignored");
        }

        tracing::debug!(key = %key, "cache miss");
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Current write generations of `depends_on`. Take them before reading the store and
    /// pass them to [`ResultCache::set`].
    pub fn generations(&self, depends_on: Vec<String>) -> Generations {
        Generations(
            depends_on
                .into_iter()
                .map(|t| {
                    let generation = self.writes.generation(&t);
                    (t, generation)
                })
                .collect(),
        )
    }

    fn is_current(&self, observed: &Generations) -> bool {
        observed
            .0
            .iter()
            .all(|(t, generation)| self.writes.generation(t) == *generation)
    }

    /// Cache `result` unless a type it read was written since `observed` was taken.
    pub async fn set(
        &self,
        key: CacheKey,
        result: SearchResult,
        observed: Generations,
    ) -> Arc<SearchResult> {
        if !self.is_current(&observed) {
            tracing::debug!(key = %key, "result predates a write; not cached");
            return Arc::new(result);
        }
        let depends_on = observed.types();

        match &self.shared {
            Some(shared) => {
                let entry = SharedEntry {
                    result,
                    depends_on,
                    created_at: now_micros(),
                };
                shared.set(key.as_str(), &entry).await;
                let value = Arc::new(entry.result);
                self.insert_local_if(&key, Arc::clone(&value), entry.depends_on, |_| {
                    self.is_current(&observed)
                });
                value
            }
            None => {
                let value = Arc::new(result);
                self.insert_local_if(&key, Arc::clone(&value), depends_on, |_| {
                    self.is_current(&observed)
                });
                value
            }
        }
    }

    /// Insert into the local tier if `valid` still holds once the tier is locked.
    ///
    /// [`ResultCache::invalidate`] records the write before it locks the tier, so an entry
    /// checked here is either rejected or inserted early enough to be removed.
    fn insert_local_if(
        &self,
        key: &CacheKey,
        value: Arc<SearchResult>,
        depends_on: Vec<String>,
        valid: impl FnOnce(&[String]) -> bool,
    ) -> bool {
        let mut local = self.local.lock();
        if !valid(&depends_on) {
            return false;
        }
        if fastrand::u32(0..CLEANUP_PROBABILITY) == 0 {
            self.sweep_expired(&mut local);
        }
        let entry = LocalEntry {
            value,
            depends_on,
            inserted_at: Instant::now(),
        };
        if let Some((old_key, _)) = local.push(key.as_str().to_string(), entry)
            && old_key != key.as_str()
        {
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.insertions.fetch_add(1, Ordering::Relaxed);
        self.stats.size.store(local.len(), Ordering::Relaxed);
        true
    }

    fn sweep_expired(&self, local: &mut LruCache<String, LocalEntry>) {
        let expired: Vec<String> = local
            .iter()
            .filter(|(_, e)| e.inserted_at.elapsed() > self.ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            local.pop(&key);
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Drop every entry that read `resource_type`. Returns the number of local entries removed.
    ///
    /// The write is recorded even when the shared tier cannot be reached, so shared entries
    /// that survive it are ignored by [`ResultCache::get`].
    pub async fn invalidate(&self, resource_type: &str) -> usize {
        self.writes.record(resource_type);
        let removed = {
            let mut local = self.local.lock();
            let stale: Vec<String> = local
                .iter()
                .filter(|(_, e)| e.depends_on.iter().any(|t| t == resource_type))
                .map(|(k, _)| k.clone())
                .collect();
            for key in &stale {
                local.pop(key);
            }
            self.stats.size.store(local.len(), Ordering::Relaxed);
            stale.len()
        };

        let shared_removed = match &self.shared {
            Some(shared) => shared.invalidate(resource_type).await,
            None => 0,
        };

        self.stats
            .invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
        tracing::debug!(
            resource_type = %resource_type,
            local = removed,
            shared = shared_removed,
            "cache invalidated"
        );
        removed
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn len(&self) -> usize {
        self.local.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear the local tier.
    pub fn clear(&self) {
        self.local.lock().clear();
        self.stats.size.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_query_string;

    fn result(ids: &[&str]) -> SearchResult {
        SearchResult {
            rows: ids.iter().map(|s| s.to_string()).collect(),
            total: ids.len() as u64,
            included: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn key(query: &str) -> CacheKey {
        CacheKey::canonical("Observation", &parse_query_string(query), 10, 0)
    }

    #[test]
    fn test_canonical_key_ignores_order() {
        assert_eq!(key("code=a&patient=1"), key("patient=1&code=a"));
        assert_eq!(key("code=b&code=a"), key("code=a&code=b"));
        assert_ne!(key("code=a&code=b"), key("code=a,b"));
        assert_ne!(
            CacheKey::canonical("Observation", &parse_query_string("code=a"), 10, 0),
            CacheKey::canonical("Observation", &parse_query_string("code=a"), 10, 10)
        );
        assert_eq!(
            key("name=a b").as_str(),
            "Observation?name=a+b&%40limit=10&%40offset=0"
        );
    }

    #[test]
    fn test_hit_and_miss_counters() {
        tokio_test::block_on(async {
            let cache = ResultCache::local(10, Duration::from_secs(60));
            assert!(cache.get(&key("code=a")).await.is_none());

            cache
                .set(key("code=a"), result(&["1"]), cache.generations(vec!["Observation".into()]))
                .await;
            let hit = cache.get(&key("code=a")).await.unwrap();
            assert_eq!(hit.rows, vec!["1"]);

            let stats = cache.stats();
            assert_eq!(stats.hits, 1);
            assert_eq!(stats.misses, 1);
            assert_eq!(stats.insertions, 1);
            assert_eq!(stats.size, 1);
            assert!((stats.hit_ratio - 0.5).abs() < f64::EPSILON);
        });
    }

    #[test]
    fn test_lru_evicts_least_recently_used() {
        tokio_test::block_on(async {
            let cache = ResultCache::local(2, Duration::from_secs(60));
            cache.set(key("code=a"), result(&["a"]), cache.generations(vec![])).await;
            cache.set(key("code=b"), result(&["b"]), cache.generations(vec![])).await;
            // touch a so b becomes the oldest
            assert!(cache.get(&key("code=a")).await.is_some());
            cache.set(key("code=c"), result(&["c"]), cache.generations(vec![])).await;

            assert!(cache.get(&key("code=b")).await.is_none());
            assert!(cache.get(&key("code=a")).await.is_some());
            assert!(cache.get(&key("code=c")).await.is_some());
            assert_eq!(cache.stats().evictions, 1);
        });
    }

    #[test]
    fn test_expired_entries_are_misses() {
        tokio_test::block_on(async {
            let cache = ResultCache::local(10, Duration::ZERO);
            cache.set(key("code=a"), result(&["a"]), cache.generations(vec![])).await;
            std::thread::sleep(Duration::from_millis(5));
            assert!(cache.get(&key("code=a")).await.is_none());
            assert!(cache.is_empty());
        });
    }

    #[test]
    fn test_invalidate_by_dependency() {
        tokio_test::block_on(async {
            let cache = ResultCache::local(10, Duration::from_secs(60));
            cache
                .set(
                    key("subject.name=Smith"),
                    result(&["1"]),
                    cache.generations(vec!["Observation".into(), "Patient".into()]),
                )
                .await;
            cache
                .set(key("code=a"), result(&["2"]), cache.generations(vec!["Observation".into()]))
                .await;

            assert_eq!(cache.invalidate("Patient").await, 1);
            assert!(cache.get(&key("subject.name=Smith")).await.is_none());
            assert!(cache.get(&key("code=a")).await.is_some());

            assert_eq!(cache.invalidate("Observation").await, 1);
            assert!(cache.is_empty());
            assert_eq!(cache.stats().invalidations, 2);
        });
    }

    #[test]
    fn test_result_read_before_write_is_not_stored() {
        tokio_test::block_on(async {
            let cache = ResultCache::local(10, Duration::from_secs(60));
            let observed = cache.generations(vec!["Observation".into()]);
            // a write lands while the search is reading the store
            cache.invalidate("Observation").await;
            let value = cache.set(key("code=a"), result(&["stale"]), observed).await;
            assert_eq!(value.rows, vec!["stale"]);
            assert!(cache.get(&key("code=a")).await.is_none());

            // writes to unrelated types do not block caching
            let observed = cache.generations(vec!["Observation".into()]);
            cache.invalidate("Patient").await;
            cache.set(key("code=a"), result(&["fresh"]), observed).await;
            assert_eq!(cache.get(&key("code=a")).await.unwrap().rows, vec!["fresh"]);
        });
    }

    #[test]
    fn test_write_log_marks_older_entries() {
        let log = WriteLog::default();
        let before = now_micros();
        log.record("Patient");
        let deps = vec!["Observation".to_string(), "Patient".to_string()];
        assert!(log.written_since(&deps, before));
        assert!(!log.written_since(&["Observation".to_string()], before));
        assert!(!log.written_since(&deps, now_micros() + 1_000_000));
        assert_eq!(log.generation("Patient"), 1);
        assert_eq!(log.generation("Observation"), 0);
    }

    #[test]
    fn test_zero_capacity_still_works() {
        tokio_test::block_on(async {
            let cache = ResultCache::local(0, Duration::from_secs(60));
            cache.set(key("code=a"), result(&["a"]), cache.generations(vec![])).await;
            assert_eq!(cache.len(), 1);
        });
    }
}
