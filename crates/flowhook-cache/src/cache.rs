//! Result cache — TTL and capacity bounded memoization.
//!
//! Lookups drop an expired entry on access and count it as a miss. Inserts
//! into a full cache first purge expired entries, then evict the least
//! recently used one. With `max_entries = 1` every new key displaces the
//! previous entry whatever its remaining TTL.
//!
//! The value is computed outside the lock, so two callers missing on the
//! same key at the same time may both compute; the later insert wins.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use flowhook_core::{FlowhookError, Result};

/// User-facing cache options. `ttl_seconds = 0` means entries never expire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheOptions {
    pub max_entries: usize,
    #[serde(default)]
    pub ttl_seconds: u64,
}

impl CacheOptions {
    pub fn new(max_entries: usize, ttl_seconds: u64) -> Self {
        Self {
            max_entries,
            ttl_seconds,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(FlowhookError::Config("cache max_entries must be > 0".into()));
        }
        Ok(())
    }
}

/// Counters since the cache was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub size: usize,
}

struct Entry<V> {
    value: V,
    inserted: Instant,
    touched: u64,
}

struct Inner<K, V> {
    entries: HashMap<K, Entry<V>>,
    /// Access marker → key, oldest first.
    recency: BTreeMap<u64, K>,
    clock: u64,
    stats: CacheStats,
}

impl<K: Hash + Eq + Clone, V> Inner<K, V> {
    fn touch(&mut self, key: &K) {
        self.clock += 1;
        let marker = self.clock;
        if let Some(entry) = self.entries.get_mut(key) {
            self.recency.remove(&entry.touched);
            entry.touched = marker;
            self.recency.insert(marker, key.clone());
        }
    }

    fn remove(&mut self, key: &K) -> Option<Entry<V>> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.touched);
        Some(entry)
    }

    fn purge_expired(&mut self, ttl: Duration, now: Instant) {
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, e)| now.duration_since(e.inserted) >= ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            self.remove(&key);
            self.stats.expirations += 1;
        }
    }

    fn evict_lru(&mut self) -> bool {
        let Some((_, key)) = self.recency.pop_first() else {
            return false;
        };
        self.entries.remove(&key);
        self.stats.evictions += 1;
        true
    }
}

/// Concurrent memoization table.
pub struct ResultCache<K, V> {
    inner: Mutex<Inner<K, V>>,
    max_entries: usize,
    ttl: Option<Duration>,
}

impl<K: Hash + Eq + Clone, V: Clone> ResultCache<K, V> {
    /// `ttl` of zero disables expiry. `max_entries` is clamped to at least 1.
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                recency: BTreeMap::new(),
                clock: 0,
                stats: CacheStats::default(),
            }),
            max_entries: max_entries.max(1),
            ttl: (!ttl.is_zero()).then_some(ttl),
        }
    }

    pub fn from_options(options: &CacheOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self::new(
            options.max_entries,
            Duration::from_secs(options.ttl_seconds),
        ))
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Live value for `key`. Counts a hit or a miss.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let expired = match inner.entries.get(key) {
            None => {
                inner.stats.misses += 1;
                return None;
            }
            Some(entry) => self
                .ttl
                .is_some_and(|ttl| now.duration_since(entry.inserted) >= ttl),
        };
        if expired {
            inner.remove(key);
            inner.stats.expirations += 1;
            inner.stats.misses += 1;
            return None;
        }
        inner.touch(key);
        inner.stats.hits += 1;
        inner.entries.get(key).map(|e| e.value.clone())
    }

    /// Store `value`, evicting as needed.
    pub fn insert(&self, key: K, value: V) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get_mut(&key) {
            entry.value = value;
            entry.inserted = now;
            inner.touch(&key);
            return;
        }

        if inner.entries.len() >= self.max_entries {
            if let Some(ttl) = self.ttl {
                inner.purge_expired(ttl, now);
            }
        }
        while inner.entries.len() >= self.max_entries {
            if !inner.evict_lru() {
                break;
            }
        }

        inner.entries.insert(
            key.clone(),
            Entry {
                value,
                inserted: now,
                touched: 0,
            },
        );
        inner.touch(&key);
    }

    pub fn get_or_insert_with<F>(&self, key: K, f: F) -> V
    where
        F: FnOnce() -> V,
    {
        if let Some(value) = self.get(&key) {
            return value;
        }
        let value = f();
        self.insert(key, value.clone());
        value
    }

    /// Like [`get_or_insert_with`](Self::get_or_insert_with); errors are
    /// returned to the caller and never cached.
    pub fn get_or_try_insert_with<F, E>(&self, key: K, f: F) -> std::result::Result<V, E>
    where
        F: FnOnce() -> std::result::Result<V, E>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        let value = f()?;
        self.insert(key, value.clone());
        Ok(value)
    }

    /// Async variant for addon methods that await I/O. The lock is never
    /// held across the await.
    pub async fn get_or_try_insert_async<F, Fut, E>(&self, key: K, f: F) -> std::result::Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<V, E>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        let value = f().await?;
        self.insert(key, value.clone());
        Ok(value)
    }

    pub fn invalidate(&self, key: &K) -> bool {
        self.inner.lock().remove(key).is_some()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.recency.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            size: inner.entries.len(),
            ..inner.stats
        }
    }
}
