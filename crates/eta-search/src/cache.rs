//! Hit count caching
//!
//! PMI evaluation issues the same entity query once per discriminator and the
//! threshold sweep repeats whole concepts, so counts are memoised with moka.
//! Only successful lookups are cached; a failed query is retried next time.
//!
//! Author: hephaex@gmail.com

use async_trait::async_trait;
use eta_core::{HitCountService, Result};
use moka::future::Cache;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ============================================================================
// Cached Hit Counter
// ============================================================================

/// Memoising wrapper around another hit count service
#[derive(Clone)]
pub struct CachedHitCounter<S> {
    inner: Arc<S>,
    cache: Cache<String, u64>,
    stats: Arc<CacheStats>,
}

impl<S: HitCountService> CachedHitCounter<S> {
    /// Wrap a service with a cache holding at most `max_capacity` counts
    pub fn new(inner: S, max_capacity: u64) -> Self {
        Self {
            inner: Arc::new(inner),
            cache: Cache::builder().max_capacity(max_capacity).build(),
            stats: Arc::new(CacheStats::default()),
        }
    }

    /// Clear all cached counts
    pub async fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        self.stats.reset();
    }

    /// Counters since creation or the last [`clear`](Self::clear)
    pub fn stats(&self) -> CacheSnapshot {
        self.stats.snapshot()
    }

    /// Get current cache size
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Wrapped service
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: HitCountService> HitCountService for CachedHitCounter<S> {
    async fn hit_count(&self, query: &str) -> Result<u64> {
        if let Some(count) = self.cache.get(query).await {
            self.stats.record_hit();
            return Ok(count);
        }
        self.stats.record_miss();

        let count = self.inner.hit_count(query).await?;
        self.cache.insert(query.to_string(), count).await;
        self.stats.record_write();
        Ok(count)
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

// ============================================================================
// Cache Statistics
// ============================================================================

/// Lookup counters of a [`CachedHitCounter`]
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
}

/// Point-in-time copy of [`CacheStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
}

impl CacheStats {
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    fn reset(&self) {
        for counter in [&self.hits, &self.misses, &self.writes] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eta_core::EtaError;
    use std::sync::atomic::AtomicUsize;

    /// Counts how often the wrapped service is actually queried
    struct CountingService {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl HitCountService for CountingService {
        async fn hit_count(&self, query: &str) -> Result<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(EtaError::HitCount("offline".to_string()))
            } else {
                Ok(query.len() as u64)
            }
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    #[tokio::test]
    async fn test_repeated_queries_hit_cache() {
        let cached = CachedHitCounter::new(
            CountingService {
                calls: AtomicUsize::new(0),
                fail: false,
            },
            100,
        );

        assert_eq!(cached.hit_count("\"London\"").await.unwrap(), 8);
        assert_eq!(cached.hit_count("\"London\"").await.unwrap(), 8);
        assert_eq!(cached.inner().calls.load(Ordering::SeqCst), 1);

        assert_eq!(
            cached.stats(),
            CacheSnapshot {
                hits: 1,
                misses: 1,
                writes: 1,
            }
        );
        assert_eq!(cached.name(), "counting");
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let cached = CachedHitCounter::new(
            CountingService {
                calls: AtomicUsize::new(0),
                fail: true,
            },
            100,
        );

        assert!(cached.hit_count("\"Paris\"").await.is_err());
        assert!(cached.hit_count("\"Paris\"").await.is_err());
        assert_eq!(cached.inner().calls.load(Ordering::SeqCst), 2);
        assert_eq!(cached.stats().writes, 0);
    }

    #[tokio::test]
    async fn test_clear_resets_stats() {
        let cached = CachedHitCounter::new(
            CountingService {
                calls: AtomicUsize::new(0),
                fail: false,
            },
            100,
        );
        cached.hit_count("a").await.unwrap();
        cached.clear().await;
        assert_eq!(cached.stats(), CacheSnapshot::default());
        assert_eq!(cached.entry_count(), 0);
    }
}
