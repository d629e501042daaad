//! Cache store capability and the in-memory implementation.
//!
//! The gateway only needs `get` and `put`. Capacity and eviction belong to
//! the store: [`MemoryStore`] is a moka LRU whose entries physically outlive
//! their TTL by a retention window, so a lookup shortly after expiry still
//! finds the entry and can report `EXPIRED` rather than `MISS`.
//!
//! A shared backend (e.g. redis for several gateway instances) plugs in by
//! implementing [`CacheStore`]; keys are already stable across processes.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache;

use super::{CacheEntry, CacheKey};

/// Key-value store for cached responses.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Look up an entry. Freshness is judged by the caller.
    async fn get(&self, key: &CacheKey) -> Option<CacheEntry>;

    /// Store an entry, replacing any previous one under `key`.
    async fn put(&self, key: CacheKey, entry: CacheEntry);
}

/// Configuration for [`MemoryStore`].
///
/// ```rust
/// # use heimdall::cache::StoreConfig;
/// # use std::time::Duration;
/// let config = StoreConfig::new()
///     .max_entries(50_000)
///     .retention(Duration::from_secs(60));
/// ```
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum number of cached entries. Default: 10,000.
    pub max_entries: u64,
    /// How long an entry stays physically present past its TTL. Default: 5 minutes.
    pub retention: Duration,
    /// Physical lifetime for entries that recorded no TTL. Default: 1 hour.
    pub untimed_lifetime: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            retention: Duration::from_secs(300),
            untimed_lifetime: Duration::from_secs(3600),
        }
    }
}

impl StoreConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of cached entries.
    pub fn max_entries(mut self, n: u64) -> Self {
        self.max_entries = n;
        self
    }

    /// Set how long entries are retained past their TTL.
    pub fn retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }
}

/// Per-entry physical expiry: TTL plus retention.
struct RetainPastTtl {
    retention: Duration,
    untimed_lifetime: Duration,
}

impl RetainPastTtl {
    fn lifetime(&self, entry: &CacheEntry) -> Duration {
        match entry.ttl_secs {
            Some(ttl) if ttl > 0 => Duration::from_secs(ttl).saturating_add(self.retention),
            _ => self.untimed_lifetime,
        }
    }
}

impl Expiry<CacheKey, CacheEntry> for RetainPastTtl {
    fn expire_after_create(
        &self,
        _key: &CacheKey,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(self.lifetime(value))
    }

    fn expire_after_update(
        &self,
        _key: &CacheKey,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(self.lifetime(value))
    }
}

/// In-process LRU cache store.
pub struct MemoryStore {
    cache: Cache<CacheKey, CacheEntry>,
}

impl MemoryStore {
    pub fn new(config: &StoreConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_entries)
            .expire_after(RetainPastTtl {
                retention: config.retention,
                untimed_lifetime: config.untimed_lifetime,
            })
            .build();
        Self { cache }
    }

    /// Number of entries currently held (approximate until pending
    /// maintenance runs).
    pub fn len(&self) -> u64 {
        self.cache.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(&StoreConfig::default())
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.cache.get(key).await
    }

    async fn put(&self, key: CacheKey, entry: CacheEntry) {
        self.cache.insert(key, entry).await;
    }
}
