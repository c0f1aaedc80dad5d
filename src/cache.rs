//! Token validation cache with TTL
//!
//! Remembers bearer tokens that recently passed external validation so the
//! key gate does not call the validator on every request. Only successes are
//! stored. Keys are the raw token, matched exactly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

/// Thread-safe token cache with TTL expiry
pub struct TokenCache {
    /// Entries keyed by raw bearer token
    entries: DashMap<String, CacheEntry>,
    /// Size at which `set` sweeps expired entries before inserting
    max_entries: usize,
    /// Cache statistics
    stats: CacheStats,
}

/// A remembered successful validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEntry {
    /// Instant after which the validation is no longer trusted
    pub expires_at: Instant,
}

impl CacheEntry {
    fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// Cache statistics tracked atomically
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Lookups answered from the cache
    pub hits: AtomicU64,
    /// Lookups that found nothing or an expired entry
    pub misses: AtomicU64,
    /// Expired entries removed (lazily or by sweep)
    pub evictions: AtomicU64,
}

impl CacheStats {
    /// Get current cache hit count
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get current cache miss count
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Get current eviction count
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Calculate hit rate as a fraction (0.0-1.0)
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

impl TokenCache {
    /// Default size at which inserts trigger a sweep
    pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

    /// Create a new empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_entries(Self::DEFAULT_MAX_ENTRIES)
    }

    /// Create a cache that sweeps on insert once it holds `max_entries`
    #[must_use]
    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries,
            stats: CacheStats::default(),
        }
    }

    /// Look up a token.
    ///
    /// Returns `None` if the token is unknown or its entry has expired.
    /// Expired entries are removed on the spot.
    pub fn get(&self, token: &str) -> Option<CacheEntry> {
        let now = Instant::now();
        let entry = self.entries.get(token).map(|e| *e.value());

        match entry {
            Some(entry) if !entry.is_expired_at(now) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            Some(_) => {
                // Only drop it if nobody refreshed the entry in the meantime
                if self
                    .entries
                    .remove_if(token, |_, e| e.is_expired_at(now))
                    .is_some()
                {
                    self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                }
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Remember a successful validation for `ttl`.
    ///
    /// Re-inserting a token overwrites its expiry. A `ttl` too large to
    /// represent as an instant is not cached.
    pub fn set(&self, token: &str, ttl: Duration) {
        let Some(expires_at) = Instant::now().checked_add(ttl) else {
            tracing::warn!(?ttl, "Token TTL out of range, not caching");
            return;
        };

        if self.entries.len() >= self.max_entries {
            self.sweep();
        }

        self.entries
            .insert(token.to_string(), CacheEntry { expires_at });
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired_at(now));
        let removed = before.saturating_sub(self.entries.len());

        if removed > 0 {
            self.stats
                .evictions
                .fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    /// Clear all cached entries
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of entries, expired ones included until swept
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits(),
            misses: self.stats.misses(),
            evictions: self.stats.evictions(),
            size: self.entries.len(),
            hit_rate: self.stats.hit_rate(),
        }
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of cache statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStatsSnapshot {
    /// Total cache hits
    pub hits: u64,
    /// Total cache misses
    pub misses: u64,
    /// Total evictions
    pub evictions: u64,
    /// Current number of entries
    pub size: usize,
    /// Hit rate (0.0-1.0)
    pub hit_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit() {
        let cache = TokenCache::new();
        cache.set("tok_abc", TTL);

        let entry = cache.get("tok_abc").expect("entry should be cached");
        assert!(entry.expires_at > Instant::now());
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_miss() {
        let cache = TokenCache::new();
        assert!(cache.get("unknown").is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_case_sensitive() {
        let cache = TokenCache::new();
        cache.set("Token", TTL);
        assert!(cache.get("token").is_none());
        assert!(cache.get("Token").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_boundary() {
        let cache = TokenCache::new();
        cache.set("tok", TTL);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get("tok").is_some());

        // Exactly at expiry the entry is no longer valid
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get("tok").is_none());
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reinsert_extends_ttl() {
        let cache = TokenCache::new();
        cache.set("tok", TTL);

        tokio::time::advance(Duration::from_secs(50)).await;
        cache.set("tok", TTL);

        tokio::time::advance(Duration::from_secs(50)).await;
        assert!(cache.get("tok").is_some());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_expired() {
        let cache = TokenCache::new();
        cache.set("short", Duration::from_secs(1));
        cache.set("long", TTL);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.sweep(), 1);

        assert_eq!(cache.len(), 1);
        assert!(cache.get("long").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_at_capacity_sweeps_first() {
        let cache = TokenCache::with_max_entries(2);
        cache.set("a", Duration::from_secs(1));
        cache.set("b", Duration::from_secs(1));

        tokio::time::advance(Duration::from_secs(2)).await;
        cache.set("c", TTL);

        assert_eq!(cache.len(), 1);
        assert!(cache.get("c").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_ttl_not_cached() {
        let cache = TokenCache::new();
        cache.set("tok", Duration::MAX);
        cache.set("tok2", Duration::from_secs(u64::MAX / 2));

        assert!(cache.is_empty());
        assert!(cache.get("tok").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotating_tokens_stay_bounded() {
        let cache = TokenCache::with_max_entries(16);
        for i in 0..200 {
            cache.set(&format!("tok_{i}"), Duration::from_secs(1));
            tokio::time::advance(Duration::from_secs(2)).await;
        }
        assert!(cache.len() <= 16);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear() {
        let cache = TokenCache::new();
        cache.set("a", TTL);
        cache.set("b", TTL);
        assert_eq!(cache.stats().size, 2);

        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get("a").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_rate() {
        let cache = TokenCache::new();
        cache.set("a", TTL);

        cache.get("a");
        cache.get("a");
        cache.get("missing");

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.666).abs() < 0.01);
    }

    #[test]
    fn test_default_impl() {
        let cache = TokenCache::default();
        assert_eq!(cache.stats().hits, 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_sets() {
        let cache = std::sync::Arc::new(TokenCache::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = std::sync::Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        cache.set(&format!("tok_{}", i % 10), TTL);
                        cache.get(&format!("tok_{t}"));
                        cache.sweep();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 10);
    }
}
