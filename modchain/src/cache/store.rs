//! Stage output storage.

use super::Fingerprint;
use crate::errors::ModchainError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const fn default_max_entries() -> usize {
    1024
}

/// How the cache bounds itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Keep at most `max_entries`, evicting the least recently used.
    Lru {
        /// Capacity.
        #[serde(default = "default_max_entries")]
        max_entries: usize,
    },
    /// Like `Lru`, and entries older than `ttl_ms` read as misses.
    Ttl {
        /// Entry lifetime.
        ttl_ms: u64,
        /// Capacity.
        #[serde(default = "default_max_entries")]
        max_entries: usize,
    },
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self::Lru {
            max_entries: default_max_entries(),
        }
    }
}

impl EvictionPolicy {
    /// Returns the capacity bound.
    #[must_use]
    pub const fn max_entries(&self) -> usize {
        match self {
            Self::Lru { max_entries } | Self::Ttl { max_entries, .. } => *max_entries,
        }
    }

    /// Returns the entry lifetime, if any.
    #[must_use]
    pub const fn ttl(&self) -> Option<Duration> {
        match self {
            Self::Lru { .. } => None,
            Self::Ttl { ttl_ms, .. } => Some(Duration::from_millis(*ttl_ms)),
        }
    }
}

/// Cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether stage outputs are cached at all.
    pub enabled: bool,
    /// Bounding policy.
    pub eviction: EvictionPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            eviction: EvictionPolicy::default(),
        }
    }
}

impl CacheConfig {
    /// Creates a new cache config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Disables caching.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Sets the eviction policy.
    #[must_use]
    pub fn with_eviction(mut self, eviction: EvictionPolicy) -> Self {
        self.eviction = eviction;
        self
    }
}

/// One cached stage output. Immutable once stored.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// The stage output.
    pub value: Value,
    /// Full digest of the fingerprint that produced this entry.
    pub digest: String,
    /// The run that stored the entry.
    pub created_by: String,
    /// Wall-clock creation time.
    pub created_at: DateTime<Utc>,
    inserted: Instant,
}

impl CacheEntry {
    fn new(fingerprint: &Fingerprint, value: Value, owner_run: &str) -> Self {
        Self {
            value,
            digest: fingerprint.digest().to_string(),
            created_by: owner_run.to_string(),
            created_at: Utc::now(),
            inserted: Instant::now(),
        }
    }

    /// Returns the entry's age.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.inserted.elapsed()
    }
}

/// Result of a cache read.
#[derive(Debug, Clone)]
pub enum CacheLookup {
    /// A stored entry.
    Hit(Arc<CacheEntry>),
    /// Nothing usable stored.
    Miss,
}

impl CacheLookup {
    /// Returns true on a hit.
    #[must_use]
    pub const fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }

    /// Returns the entry on a hit.
    #[must_use]
    pub fn entry(self) -> Option<Arc<CacheEntry>> {
        match self {
            Self::Hit(entry) => Some(entry),
            Self::Miss => None,
        }
    }
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Successful reads.
    pub hits: u64,
    /// Reads that found nothing usable.
    pub misses: u64,
    /// Stored entries.
    pub insertions: u64,
    /// Entries dropped for capacity.
    pub evictions: u64,
    /// Entries dropped for age.
    pub expirations: u64,
    /// Entries dropped because their digest did not match.
    pub corruptions: u64,
    /// Entries removed by a rollback.
    pub invalidations: u64,
}

/// Storage for stage outputs keyed by fingerprint.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Reads an entry.
    async fn get(&self, fingerprint: &Fingerprint) -> CacheLookup;

    /// Stores an output owned by `owner_run`.
    ///
    /// Returns false if an entry for the same fingerprint already exists;
    /// the existing entry and its owner are kept.
    async fn put(&self, fingerprint: &Fingerprint, value: Value, owner_run: &str) -> bool;

    /// Removes an entry, but only if `run_id` stored it.
    async fn invalidate_owned(&self, fingerprint: &Fingerprint, run_id: &str) -> bool;

    /// Removes every entry.
    async fn clear(&self);

    /// Returns the number of stored entries.
    async fn len(&self) -> usize;

    /// Returns the counters.
    fn stats(&self) -> CacheStats;
}

struct CacheState {
    entries: LruCache<String, Arc<CacheEntry>>,
    stats: CacheStats,
}

/// A bounded in-process cache.
///
/// One mutex guards the LRU; it is never held across an await, so the async
/// interface never blocks on another task's I/O.
pub struct InMemoryCache {
    state: Mutex<CacheState>,
    ttl: Option<Duration>,
}

impl InMemoryCache {
    /// Creates a cache with the given policy.
    #[must_use]
    pub fn new(policy: EvictionPolicy) -> Self {
        let capacity = NonZeroUsize::new(policy.max_entries()).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(CacheState {
                entries: LruCache::new(capacity),
                stats: CacheStats::default(),
            }),
            ttl: policy.ttl(),
        }
    }

    /// Creates a cache from configuration.
    #[must_use]
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.eviction)
    }

    /// Returns the capacity bound.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.state.lock().entries.cap().get()
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new(EvictionPolicy::default())
    }
}

impl std::fmt::Debug for InMemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("InMemoryCache")
            .field("len", &state.entries.len())
            .field("capacity", &state.entries.cap())
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get(&self, fingerprint: &Fingerprint) -> CacheLookup {
        let mut state = self.state.lock();

        let Some(entry) = state.entries.get(fingerprint.key()).cloned() else {
            state.stats.misses += 1;
            return CacheLookup::Miss;
        };

        if entry.digest != fingerprint.digest() {
            let error = ModchainError::CacheCorruption {
                key: fingerprint.key().to_string(),
            };
            warn!(error = %error, "Dropping colliding cache entry");
            state.entries.pop(fingerprint.key());
            state.stats.corruptions += 1;
            state.stats.misses += 1;
            return CacheLookup::Miss;
        }

        if self.ttl.is_some_and(|ttl| entry.age() >= ttl) {
            debug!(key = %fingerprint, "Cache entry expired");
            state.entries.pop(fingerprint.key());
            state.stats.expirations += 1;
            state.stats.misses += 1;
            return CacheLookup::Miss;
        }

        state.stats.hits += 1;
        CacheLookup::Hit(entry)
    }

    async fn put(&self, fingerprint: &Fingerprint, value: Value, owner_run: &str) -> bool {
        let mut state = self.state.lock();

        if let Some(existing) = state.entries.peek(fingerprint.key()) {
            let expired = self.ttl.is_some_and(|ttl| existing.age() >= ttl);
            if existing.digest == fingerprint.digest() && !expired {
                return false;
            }
        }

        let entry = Arc::new(CacheEntry::new(fingerprint, value, owner_run));
        if let Some((evicted_key, _)) = state.entries.push(fingerprint.key().to_string(), entry) {
            if evicted_key != fingerprint.key() {
                debug!(key = %evicted_key, "Evicted least recently used cache entry");
                state.stats.evictions += 1;
            }
        }
        state.stats.insertions += 1;
        true
    }

    async fn invalidate_owned(&self, fingerprint: &Fingerprint, run_id: &str) -> bool {
        let mut state = self.state.lock();
        let owned = state.entries.peek(fingerprint.key()).is_some_and(|entry| {
            entry.created_by == run_id && entry.digest == fingerprint.digest()
        });
        if owned {
            state.entries.pop(fingerprint.key());
            state.stats.invalidations += 1;
        }
        owned
    }

    async fn clear(&self) {
        self.state.lock().entries.clear();
    }

    async fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    fn stats(&self) -> CacheStats {
        self.state.lock().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn fp(stage: &str) -> Fingerprint {
        Fingerprint::compute(stage, &json!("input"), "m")
    }

    #[tokio::test]
    async fn test_put_then_get_returns_identical_value() {
        let cache = InMemoryCache::default();
        let value = json!({"summary": "short", "tokens": [1, 2, 3]});

        assert!(!cache.get(&fp("s")).await.is_hit());
        assert!(cache.put(&fp("s"), value.clone(), "run-1").await);

        let entry = cache.get(&fp("s")).await.entry().unwrap();
        assert_eq!(entry.value, value);
        assert_eq!(entry.created_by, "run-1");
        assert_eq!(
            serde_json::to_vec(&entry.value).unwrap(),
            serde_json::to_vec(&value).unwrap()
        );
    }

    #[tokio::test]
    async fn test_first_writer_keeps_ownership() {
        let cache = InMemoryCache::default();
        assert!(cache.put(&fp("s"), json!(1), "run-1").await);
        assert!(!cache.put(&fp("s"), json!(2), "run-2").await);

        let entry = cache.get(&fp("s")).await.entry().unwrap();
        assert_eq!(entry.value, json!(1));
        assert_eq!(entry.created_by, "run-1");
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let cache = InMemoryCache::new(EvictionPolicy::Lru { max_entries: 2 });
        cache.put(&fp("a"), json!("a"), "r").await;
        cache.put(&fp("b"), json!("b"), "r").await;
        // Touch "a" so "b" becomes least recently used.
        assert!(cache.get(&fp("a")).await.is_hit());
        cache.put(&fp("c"), json!("c"), "r").await;

        assert_eq!(cache.len().await, 2);
        assert!(cache.get(&fp("a")).await.is_hit());
        assert!(!cache.get(&fp("b")).await.is_hit());
        assert!(cache.get(&fp("c")).await.is_hit());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_ttl_expiry_is_a_miss() {
        let cache = InMemoryCache::new(EvictionPolicy::Ttl {
            ttl_ms: 20,
            max_entries: 8,
        });
        cache.put(&fp("s"), json!(1), "r").await;
        assert!(cache.get(&fp("s")).await.is_hit());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!cache.get(&fp("s")).await.is_hit());
        assert_eq!(cache.len().await, 0);
        assert_eq!(cache.stats().expirations, 1);

        // An expired entry can be replaced.
        assert!(cache.put(&fp("s"), json!(2), "r2").await);
    }

    #[tokio::test]
    async fn test_digest_mismatch_is_a_miss() {
        let cache = InMemoryCache::default();
        let real = fp("s");
        cache.put(&real, json!("original"), "r").await;

        let colliding = Fingerprint::from_raw(real.key(), "f".repeat(64));
        assert!(!cache.get(&colliding).await.is_hit());
        assert_eq!(cache.stats().corruptions, 1);
        // The suspicious entry is gone.
        assert!(!cache.get(&real).await.is_hit());
    }

    #[tokio::test]
    async fn test_invalidation_checks_owner() {
        let cache = InMemoryCache::default();
        cache.put(&fp("mine"), json!(1), "run-1").await;
        cache.put(&fp("theirs"), json!(2), "run-2").await;

        assert!(cache.invalidate_owned(&fp("mine"), "run-1").await);
        assert!(!cache.invalidate_owned(&fp("theirs"), "run-1").await);
        assert!(!cache.invalidate_owned(&fp("absent"), "run-1").await);

        assert!(!cache.get(&fp("mine")).await.is_hit());
        assert!(cache.get(&fp("theirs")).await.is_hit());
        assert_eq!(cache.stats().invalidations, 1);
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = InMemoryCache::default();
        cache.put(&fp("a"), json!(1), "r").await;
        cache.clear().await;
        assert_eq!(cache.len().await, 0);
    }

    #[test]
    fn test_policy_serialization() {
        let policy: EvictionPolicy =
            serde_json::from_str(r#"{"policy": "ttl", "ttl_ms": 500}"#).unwrap();
        assert_eq!(
            policy,
            EvictionPolicy::Ttl {
                ttl_ms: 500,
                max_entries: 1024
            }
        );
        assert_eq!(policy.ttl(), Some(Duration::from_millis(500)));

        let config: CacheConfig = serde_json::from_str("{}").unwrap();
        assert!(config.enabled);
        assert_eq!(config.eviction.max_entries(), 1024);
    }
}
