//! First-page response cache.
//!
//! [`ResponseCache`] stores the first page of a query so that re-opening a
//! list (or switching back to a previous search) can paint immediately
//! without a data-source round-trip.
//!
//! # Architecture
//!
//! The cache is an explicitly constructed service. Create one, wrap it in an
//! `Arc`, and hand it to any number of engines through
//! [`EngineBuilder::cache()`](crate::EngineBuilder::cache); engines only
//! touch entries under their own namespace. Dropping the last `Arc` (or
//! calling [`shutdown()`](ResponseCache::shutdown)) releases every entry.
//!
//! # Expiry
//!
//! Each entry carries its own TTL, enforced by moka's per-entry
//! [`Expiry`]: entries are removed at `inserted_at + ttl` whether or not
//! they are read again. Readers may additionally ask for a tighter bound
//! via the `max_age` argument of [`get()`](ResponseCache::get); entries
//! older than that are removed on the spot.
//!
//! # Defensive copies
//!
//! `set()` clones the data in and `get()` clones it out, so neither the
//! producer nor any consumer can mutate a cached snapshot.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use moka::Expiry;
use moka::sync::Cache;
use tracing::debug;

/// Configuration for the response cache.
///
/// ```rust
/// # use huginn::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .max_entries(500)
///     .ttl(Duration::from_secs(60));
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached first pages. Default: 10,000.
    pub max_entries: u64,
    /// Default time-to-live used by engines that do not override it.
    /// Default: 5 minutes.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl: Duration::from_secs(300),
        }
    }
}

impl CacheConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of cached entries.
    pub fn max_entries(mut self, n: u64) -> Self {
        self.max_entries = n;
        self
    }

    /// Set the default time-to-live.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

/// A stored snapshot.
#[derive(Debug)]
pub struct CacheEntry<T> {
    pub data: Vec<T>,
    pub total_count: usize,
    pub inserted_at: Instant,
    pub ttl: Duration,
}

/// A defensive copy handed out by [`ResponseCache::get`].
#[derive(Debug, Clone, PartialEq)]
pub struct CachedPage<T> {
    pub data: Vec<T>,
    pub total_count: usize,
}

/// Expire each entry `ttl` after it was written.
struct PerEntryTtl;

impl<T> Expiry<String, Arc<CacheEntry<T>>> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Arc<CacheEntry<T>>,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Arc<CacheEntry<T>>,
        _updated_at: std::time::Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Shared key → first-page store with per-entry expiry.
pub struct ResponseCache<T> {
    entries: Cache<String, Arc<CacheEntry<T>>>,
    default_ttl: Duration,
    closed: AtomicBool,
}

impl<T> ResponseCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new response cache with the given configuration.
    pub fn new(config: &CacheConfig) -> Self {
        let entries = Cache::builder()
            .max_capacity(config.max_entries)
            .expire_after(PerEntryTtl)
            .build();
        Self {
            entries,
            default_ttl: config.ttl,
            closed: AtomicBool::new(false),
        }
    }

    /// TTL from the configuration this cache was built with.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Store a copy of `data` under `key`, expiring after `ttl`.
    ///
    /// Overwrites any previous entry and restarts its expiry. Ignored after
    /// [`shutdown()`](Self::shutdown).
    pub fn set(&self, key: &str, data: &[T], total_count: usize, ttl: Duration) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let entry = CacheEntry {
            data: data.to_vec(),
            total_count,
            inserted_at: Instant::now(),
            ttl,
        };
        self.entries.insert(key.to_owned(), Arc::new(entry));
    }

    /// Return a copy of the entry under `key` if it is at most `max_age` old.
    ///
    /// An entry older than `max_age` is removed and reported as a miss.
    pub fn get(&self, key: &str, max_age: Duration) -> Option<CachedPage<T>> {
        let entry = self.entries.get(key)?;
        if entry.inserted_at.elapsed() > max_age {
            debug!(key, "dropping stale cache entry");
            self.entries.invalidate(key);
            return None;
        }
        Some(CachedPage {
            data: entry.data.clone(),
            total_count: entry.total_count,
        })
    }

    /// Remove every entry whose key starts with `prefix`.
    ///
    /// Returns the number of entries removed.
    pub fn clear(&self, prefix: &str) -> usize {
        let keys: Vec<Arc<String>> = self
            .entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key)
            .collect();
        for key in &keys {
            self.entries.invalidate(key.as_str());
        }
        keys.len()
    }

    /// Remove every entry.
    pub fn clear_all(&self) {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks();
    }

    /// Number of live entries.
    pub fn len(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry and refuse further writes.
    ///
    /// Idempotent. Pending expirations are resolved before this returns, so
    /// no entry outlives the call.
    pub fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("response cache shutting down");
        }
        self.clear_all();
    }

    /// Whether [`shutdown()`](Self::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl<T> Default for ResponseCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let cache = ResponseCache::default();
        cache.set("ns:a", &[1, 2, 3], 10, Duration::from_secs(60));
        let page = cache.get("ns:a", Duration::from_secs(60)).unwrap();
        assert_eq!(page.data, vec![1, 2, 3]);
        assert_eq!(page.total_count, 10);
    }

    #[test]
    fn get_returns_independent_copies() {
        let cache = ResponseCache::default();
        cache.set("k", &[String::from("a")], 1, Duration::from_secs(60));

        let mut first = cache.get("k", Duration::from_secs(60)).unwrap();
        first.data.push("mutated".into());

        let second = cache.get("k", Duration::from_secs(60)).unwrap();
        assert_eq!(second.data, vec![String::from("a")]);
    }

    #[test]
    fn zero_max_age_evicts_on_read() {
        let cache = ResponseCache::default();
        cache.set("k", &[1], 1, Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("k", Duration::ZERO).is_none());
        // Removed, so a generous max_age no longer finds it.
        assert!(cache.get("k", Duration::from_secs(60)).is_none());
    }

    #[test]
    fn clear_prefix_leaves_other_namespaces() {
        let cache = ResponseCache::default();
        let ttl = Duration::from_secs(60);
        cache.set("items:a", &[1], 1, ttl);
        cache.set("items:b", &[2], 1, ttl);
        cache.set("itemsets:a", &[3], 1, ttl);

        assert_eq!(cache.clear("items:"), 2);
        assert!(cache.get("items:a", ttl).is_none());
        assert!(cache.get("items:b", ttl).is_none());
        assert!(cache.get("itemsets:a", ttl).is_some());
    }

    #[test]
    fn shutdown_drops_entries_and_ignores_writes() {
        let cache = ResponseCache::default();
        let ttl = Duration::from_secs(60);
        cache.set("k", &[1], 1, ttl);
        cache.shutdown();
        assert!(cache.is_empty());
        cache.set("k", &[1], 1, ttl);
        assert!(cache.get("k", ttl).is_none());
        assert!(cache.is_shut_down());
    }
}
