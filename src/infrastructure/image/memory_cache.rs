//! In-memory LRU image cache over a cost-bounded backing store.
//!
//! Decoded images live in a `moka` cache weighted by approximate byte cost.
//! That store may drop entries on its own under cost pressure, reporting them
//! through an eviction listener that can fire on any thread. The listener only
//! appends to an [`EvictionLog`]; the LRU list is reconciled against that log
//! under the cache's own lock before anything reads it.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use image::DynamicImage;
use lru::LruCache;
use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::eviction_log::EvictionLog;
use crate::domain::entities::CacheKey;
use crate::domain::ports::ImageCachePort;

/// Default maximum number of tracked keys.
pub const DEFAULT_MAX_ENTRIES: usize = 200;

/// Default total byte-cost ceiling (128 MB).
pub const DEFAULT_MAX_COST_BYTES: u64 = 128 * 1024 * 1024;

/// Approximate memory footprint of a decoded image: 4 bytes per pixel,
/// whatever the actual pixel format.
#[must_use]
pub fn image_cost(image: &DynamicImage) -> u64 {
    u64::from(image.width()) * u64::from(image.height()) * 4
}

#[derive(Clone)]
struct CacheEntry {
    image: Arc<DynamicImage>,
    cost: u32,
    generation: u64,
}

/// In-memory LRU cache for decoded images.
///
/// Bounded twice: by tracked key count (strict LRU, enforced here) and by
/// total cost (enforced by the backing store).
pub struct MemoryImageCache {
    store: Cache<CacheKey, CacheEntry>,
    /// Recency list: key -> generation of the value it tracks.
    lru: Mutex<LruCache<CacheKey, u64>>,
    evictions: Arc<EvictionLog>,
    next_generation: AtomicU64,
    max_cost: u64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryImageCache {
    /// Creates a cache tracking at most `max_entries` keys and holding at
    /// most `max_cost_bytes` of decoded pixels.
    #[must_use]
    pub fn new(max_entries: usize, max_cost_bytes: u64) -> Self {
        let cap = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        let evictions = Arc::new(EvictionLog::new());
        let sink = Arc::clone(&evictions);

        let store = Cache::builder()
            .max_capacity(max_cost_bytes)
            .eviction_policy(EvictionPolicy::lru())
            .weigher(|_key: &CacheKey, entry: &CacheEntry| entry.cost)
            .eviction_listener(move |key: Arc<CacheKey>, entry: CacheEntry, cause| {
                // Explicit removals and replacements are already reflected in
                // the LRU list.
                if matches!(cause, RemovalCause::Size | RemovalCause::Expired) {
                    sink.record((*key).clone(), entry.generation);
                }
            })
            .build();

        Self {
            store,
            lru: Mutex::new(LruCache::new(cap)),
            evictions,
            next_generation: AtomicU64::new(0),
            max_cost: max_cost_bytes,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Creates a cache with the default bounds.
    #[must_use]
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES, DEFAULT_MAX_COST_BYTES)
    }

    /// Returns an image without promoting it in the LRU.
    #[must_use]
    pub fn peek(&self, key: &CacheKey) -> Option<Arc<DynamicImage>> {
        self.store.get(key).map(|entry| entry.image)
    }

    /// Returns true if `key` is resident.
    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.store.contains_key(key)
    }

    /// Tracked keys, least recently used first.
    #[must_use]
    pub fn tracked_keys(&self) -> Vec<CacheKey> {
        self.store.run_pending_tasks();
        let mut lru = self.lru.lock();
        self.reconcile(&mut lru);
        lru.iter().rev().map(|(key, _)| key.clone()).collect()
    }

    /// Returns cache statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        // Flush pending store evictions into the log before draining it.
        self.store.run_pending_tasks();
        let tracked = {
            let mut lru = self.lru.lock();
            self.reconcile(&mut lru);
            lru.len()
        };

        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        CacheStats {
            hits,
            misses,
            hit_rate,
            size: self.resident_count(),
            tracked,
            cost_bytes: self.store.weighted_size(),
            max_cost_bytes: self.max_cost,
        }
    }

    /// Applies pending backing-store evictions to the LRU list.
    ///
    /// A record only drops a key still tracking the same generation, so a
    /// late record for a value that has since been replaced is ignored.
    fn reconcile(&self, lru: &mut LruCache<CacheKey, u64>) {
        let records = self.evictions.drain();
        if records.is_empty() {
            return;
        }

        let mut dropped = 0usize;
        for record in records {
            if lru.peek(&record.key) == Some(&record.generation) {
                lru.pop(&record.key);
                dropped += 1;
            }
        }
        if dropped > 0 {
            trace!(dropped, "Reconciled backing store evictions");
        }
    }

    fn resident_count(&self) -> usize {
        // `iter` skips entries that are invalid but not yet swept, unlike
        // `entry_count`.
        self.store.iter().count()
    }
}

impl Default for MemoryImageCache {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

impl std::fmt::Debug for MemoryImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryImageCache")
            .field("max_cost", &self.max_cost)
            .field("pending_evictions", &self.evictions.len())
            .finish_non_exhaustive()
    }
}

/// Statistics about memory cache performance.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Current number of resident images.
    pub size: usize,
    /// Keys in the LRU list.
    pub tracked: usize,
    /// Total approximate byte cost of resident images.
    pub cost_bytes: u64,
    /// Cost ceiling.
    pub max_cost_bytes: u64,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} images ({} bytes), {:.1}% hit rate ({} hits, {} misses)",
            self.size, self.cost_bytes, self.hit_rate, self.hits, self.misses
        )
    }
}

impl ImageCachePort for MemoryImageCache {
    fn get(&self, key: &CacheKey) -> Option<Arc<DynamicImage>> {
        let mut lru = self.lru.lock();
        self.reconcile(&mut lru);

        if let Some(entry) = self.store.get(key) {
            if lru.get(key).is_none()
                && let Some((evicted, _)) = lru.push(key.clone(), entry.generation)
                && evicted != *key
            {
                self.store.invalidate(&evicted);
            }
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache hit");
            Some(entry.image)
        } else {
            // Self-heal if the store dropped a key we still track.
            lru.pop(key);
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache miss");
            None
        }
    }

    fn set(&self, key: CacheKey, image: Arc<DynamicImage>) {
        let cost = u32::try_from(image_cost(&image)).unwrap_or(u32::MAX);
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        let mut lru = self.lru.lock();
        self.reconcile(&mut lru);

        debug!(key = %key, cost, "Storing image in memory cache");
        self.store.insert(
            key.clone(),
            CacheEntry {
                image,
                cost,
                generation,
            },
        );

        if let Some((evicted, _)) = lru.push(key.clone(), generation)
            && evicted != key
        {
            self.store.invalidate(&evicted);
            debug!(key = %evicted, "Evicted least recently used image");
        }
    }

    fn remove(&self, key: &CacheKey) {
        let mut lru = self.lru.lock();
        self.store.invalidate(key);
        if lru.pop(key).is_some() {
            debug!(key = %key, "Removed image from memory cache");
        }
    }

    fn remove_all_with_prefix(&self, prefix: &str) {
        let mut lru = self.lru.lock();
        self.reconcile(&mut lru);

        let mut doomed: Vec<CacheKey> = lru
            .iter()
            .filter(|(key, _)| key.has_prefix(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        doomed.extend(
            self.store
                .iter()
                .filter(|(key, _)| key.has_prefix(prefix) && !lru.contains(&**key))
                .map(|(key, _)| (*key).clone()),
        );

        for key in &doomed {
            lru.pop(key);
            self.store.invalidate(key);
        }
        debug!(prefix, removed = doomed.len(), "Removed image variants by prefix");
    }

    fn remove_all(&self) {
        let mut lru = self.lru.lock();
        let resident: Vec<Arc<CacheKey>> = self.store.iter().map(|(key, _)| key).collect();
        for key in &resident {
            self.store.invalidate(&**key);
        }
        lru.clear();
        self.evictions.clear();
        debug!("Cleared memory image cache");
    }

    fn len(&self) -> usize {
        self.resident_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn img(side: u32) -> Arc<DynamicImage> {
        Arc::new(DynamicImage::new_rgb8(side, side))
    }

    fn key(s: &str) -> CacheKey {
        CacheKey::new(s)
    }

    #[test]
    fn test_cache_set_and_get() {
        let cache = MemoryImageCache::new(10, DEFAULT_MAX_COST_BYTES);
        cache.set(key("test1"), img(100));

        let retrieved = cache.get(&key("test1"));
        assert_eq!(retrieved.map(|i| i.width()), Some(100));
    }

    #[test]
    fn test_cache_miss() {
        let cache = MemoryImageCache::new(10, DEFAULT_MAX_COST_BYTES);
        assert!(cache.get(&key("nonexistent")).is_none());
    }

    #[test]
    fn test_image_cost_is_four_bytes_per_pixel() {
        assert_eq!(image_cost(&DynamicImage::new_luma8(10, 20)), 800);
        assert_eq!(image_cost(&DynamicImage::new_rgba16(10, 20)), 800);
    }

    #[test]
    fn test_lru_read_protects_key() {
        let cache = MemoryImageCache::new(3, DEFAULT_MAX_COST_BYTES);
        for k in ["k1", "k2", "k3"] {
            cache.set(key(k), img(4));
        }

        assert!(cache.get(&key("k1")).is_some());
        cache.set(key("k4"), img(4));

        assert!(cache.get(&key("k2")).is_none());
        assert!(cache.get(&key("k1")).is_some());
        assert!(cache.get(&key("k3")).is_some());
        assert!(cache.get(&key("k4")).is_some());
    }

    #[test]
    fn test_lru_evicts_in_insertion_order() {
        let cache = MemoryImageCache::new(2, DEFAULT_MAX_COST_BYTES);
        cache.set(key("a"), img(2));
        cache.set(key("b"), img(2));
        cache.set(key("c"), img(2));

        assert_eq!(cache.tracked_keys(), vec![key("b"), key("c")]);
        assert!(!cache.contains(&key("a")));
    }

    #[test]
    fn test_reset_existing_key_does_not_evict_others() {
        let cache = MemoryImageCache::new(2, DEFAULT_MAX_COST_BYTES);
        cache.set(key("a"), img(2));
        cache.set(key("b"), img(2));
        cache.set(key("a"), img(3));

        assert_eq!(cache.tracked_keys(), vec![key("b"), key("a")]);
        assert_eq!(cache.peek(&key("a")).map(|i| i.width()), Some(3));
    }

    #[test]
    fn test_simulated_backing_eviction_is_reconciled_on_read() {
        let cache = MemoryImageCache::new(10, DEFAULT_MAX_COST_BYTES);
        for k in ["k1", "k2", "k3", "k4"] {
            cache.set(key(k), img(4));
        }

        // The backing store drops k3 and reports it out of band.
        let generation = *cache.lru.lock().peek(&key("k3")).unwrap();
        cache.store.invalidate(&key("k3"));
        cache.evictions.record(key("k3"), generation);

        let _ = cache.get(&key("k1"));

        assert!(!cache.lru.lock().contains(&key("k3")));
        assert!(cache.peek(&key("k3")).is_none());
        assert!(cache.evictions.is_empty());
    }

    #[test]
    fn test_stale_eviction_record_keeps_reinserted_key() {
        let cache = MemoryImageCache::new(10, DEFAULT_MAX_COST_BYTES);
        cache.set(key("k"), img(4));
        let old_generation = *cache.lru.lock().peek(&key("k")).unwrap();

        cache.set(key("k"), img(5));
        cache.evictions.record(key("k"), old_generation);

        assert_eq!(cache.tracked_keys(), vec![key("k")]);
        assert!(cache.get(&key("k")).is_some());
    }

    #[test]
    fn test_get_heals_untracked_drift() {
        let cache = MemoryImageCache::new(10, DEFAULT_MAX_COST_BYTES);
        cache.set(key("k"), img(4));
        // Dropped with no eviction record at all.
        cache.store.invalidate(&key("k"));

        assert!(cache.get(&key("k")).is_none());
        assert!(cache.tracked_keys().is_empty());
    }

    #[test]
    fn test_cost_pressure_keeps_tracking_consistent() {
        // 10x10 costs 400 bytes; at most two fit.
        let cache = MemoryImageCache::new(10, 1000);
        for i in 0..5 {
            cache.set(key(&format!("k{i}")), img(10));
        }
        cache.store.run_pending_tasks();

        let tracked = cache.tracked_keys();
        assert!(tracked.iter().all(|k| cache.contains(k)));
        assert_eq!(tracked.len(), cache.len());
        assert!(cache.stats().cost_bytes <= 1000);
    }

    #[test]
    fn test_stats_after_cost_pressure_match_residents() {
        // 10x10 costs 400 bytes; at most two fit.
        let cache = MemoryImageCache::new(10, 1000);
        for i in 0..5 {
            cache.set(key(&format!("k{i}")), img(10));
        }

        let stats = cache.stats();

        assert_eq!(stats.tracked, stats.size);
        assert!(stats.size <= 2);
        assert!(cache.evictions.is_empty());
    }

    #[test]
    fn test_tracked_keys_after_cost_pressure_are_resident() {
        let cache = MemoryImageCache::new(10, 1000);
        for i in 0..5 {
            cache.set(key(&format!("k{i}")), img(10));
        }

        let tracked = cache.tracked_keys();

        assert!(tracked.len() <= 2);
        assert!(tracked.iter().all(|k| cache.contains(k)));
    }

    #[test]
    fn test_remove_clears_both_structures() {
        let cache = MemoryImageCache::new(10, DEFAULT_MAX_COST_BYTES);
        cache.set(key("a"), img(2));
        cache.remove(&key("a"));

        assert!(cache.peek(&key("a")).is_none());
        assert!(cache.tracked_keys().is_empty());
        // Missing key is fine.
        cache.remove(&key("a"));
    }

    #[test]
    fn test_remove_all_with_prefix() {
        let cache = MemoryImageCache::new(10, DEFAULT_MAX_COST_BYTES);
        cache.set(key("photo1_thumb"), img(2));
        cache.set(key("photo1_full"), img(2));
        cache.set(key("photo2_thumb"), img(2));

        cache.remove_all_with_prefix("photo1_");

        assert_eq!(cache.tracked_keys(), vec![key("photo2_thumb")]);
        assert!(cache.peek(&key("photo1_thumb")).is_none());
        assert!(cache.peek(&key("photo1_full")).is_none());
        assert!(cache.peek(&key("photo2_thumb")).is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_remove_all_is_idempotent() {
        let cache = MemoryImageCache::new(10, DEFAULT_MAX_COST_BYTES);
        cache.set(key("a"), img(2));
        cache.set(key("b"), img(2));

        cache.remove_all();
        assert!(cache.is_empty());
        assert!(cache.tracked_keys().is_empty());

        cache.remove_all();
        assert!(cache.is_empty());
        assert!(cache.tracked_keys().is_empty());
    }

    #[test]
    fn test_cache_stats() {
        let cache = MemoryImageCache::new(10, DEFAULT_MAX_COST_BYTES);
        cache.set(key("test1"), img(10));

        let _ = cache.get(&key("test1"));
        let _ = cache.get(&key("missing"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
        assert_eq!(stats.tracked, 1);
        assert_eq!(stats.cost_bytes, 400);
    }

    #[test]
    fn test_peek_does_not_promote() {
        let cache = MemoryImageCache::new(2, DEFAULT_MAX_COST_BYTES);
        cache.set(key("test1"), img(2));
        cache.set(key("test2"), img(2));

        let _ = cache.peek(&key("test1"));
        cache.set(key("test3"), img(2));

        assert!(cache.peek(&key("test1")).is_none());
    }
}
