//! Memoized functions keyed by name plus serialized arguments.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use flowhook_core::Result;

use crate::cache::{CacheOptions, CacheStats, ResultCache};

/// Cache key: function identity plus a canonical encoding of the arguments.
///
/// Arguments are serialized with `serde_json`, so two argument values that
/// serialize identically share an entry. Struct fields serialize in
/// declaration order and maps should be `BTreeMap` for a stable encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    function: String,
    args: String,
}

impl CacheKey {
    pub fn new<A: Serialize + ?Sized>(function: &str, args: &A) -> Result<Self> {
        Ok(Self {
            function: function.to_string(),
            args: serde_json::to_string(args)?,
        })
    }

    pub fn function(&self) -> &str {
        &self.function
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.function, self.args)
    }
}

type MemoFn<A, V> = Box<dyn Fn(&A) -> Result<V> + Send + Sync>;

/// A function wrapped with its own [`ResultCache`].
///
/// Each wrapper owns its cache, so an addon holding a `Cached` field gets a
/// per-instance memo table.
pub struct Cached<A, V> {
    name: String,
    func: MemoFn<A, V>,
    cache: ResultCache<CacheKey, V>,
}

impl<A: Serialize, V: Clone> Cached<A, V> {
    pub fn wrap<F>(name: impl Into<String>, max_entries: usize, ttl: Duration, func: F) -> Self
    where
        F: Fn(&A) -> Result<V> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Box::new(func),
            cache: ResultCache::new(max_entries, ttl),
        }
    }

    pub fn with_options<F>(name: impl Into<String>, options: &CacheOptions, func: F) -> Result<Self>
    where
        F: Fn(&A) -> Result<V> + Send + Sync + 'static,
    {
        Ok(Self {
            name: name.into(),
            func: Box::new(func),
            cache: ResultCache::from_options(options)?,
        })
    }

    /// Cached result for `args`, computing it on a miss. Errors are returned
    /// and not cached.
    pub fn call(&self, args: &A) -> Result<V> {
        let key = CacheKey::new(&self.name, args)?;
        let hit = self.cache.get_or_try_insert_with(key, || (self.func)(args));
        if let Err(e) = &hit {
            tracing::debug!(function = %self.name, "Memoized call failed: {e}");
        }
        hit
    }

    pub fn invalidate(&self, args: &A) -> Result<bool> {
        Ok(self.cache.invalidate(&CacheKey::new(&self.name, args)?))
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<A, V> fmt::Debug for Cached<A, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cached")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
