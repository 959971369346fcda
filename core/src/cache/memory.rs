//! In-memory LRU cache for decoded bitmaps.

use std::sync::Arc;

use hashlink::LruCache;
use tracing::debug;

use crate::codec::DecodedBitmap;
use crate::types::{CacheBudget, ImageKey};

/// Byte-budgeted LRU keyed by [`ImageKey`].
///
/// Entries are shared `Arc`s, so evicting one never invalidates a bitmap a consumer
/// already holds; it only forces the next request to decode again.
#[derive(Debug)]
pub struct MemoryCache {
    entries: LruCache<ImageKey, Arc<DecodedBitmap>>,
    budget: CacheBudget,
    bytes_used: usize,
    evictions: u64,
}

impl MemoryCache {
    /// Construct a cache with the provided memory budget.
    pub fn new(budget: CacheBudget) -> Self {
        Self { entries: LruCache::new_unbounded(), budget, bytes_used: 0, evictions: 0 }
    }

    pub fn budget(&self) -> CacheBudget {
        self.budget
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total byte cost of resident entries.
    pub fn size(&self) -> usize {
        self.bytes_used
    }

    /// Entries dropped by the LRU policy since construction.
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Retrieve an entry, refreshing its recency ordering if present.
    pub fn get(&mut self, key: &ImageKey) -> Option<Arc<DecodedBitmap>> {
        self.entries.get(key).cloned()
    }

    /// Check residency without touching recency.
    pub fn contains(&self, key: &ImageKey) -> bool {
        self.entries.peek(key).is_some()
    }

    /// Insert or replace an entry, then evict least recently used entries until the
    /// running total fits the budget again.
    ///
    /// A bitmap costing more than the whole budget is not stored, and any entry it would
    /// have replaced is dropped. Returns whether the bitmap is resident afterwards.
    pub fn put(&mut self, key: ImageKey, bitmap: Arc<DecodedBitmap>) -> bool {
        if let Some(existing) = self.entries.remove(&key) {
            self.bytes_used = self.bytes_used.saturating_sub(existing.byte_cost());
        }

        let cost = bitmap.byte_cost();
        if cost > self.budget.bytes_max {
            debug!(
                target: "cache::memory",
                key = %key,
                cost,
                budget = self.budget.bytes_max,
                "bitmap exceeds cache budget, not caching"
            );
            return false;
        }

        self.bytes_used += cost;
        self.entries.insert(key, bitmap);
        self.evict_if_needed();
        true
    }

    /// Store `bitmap` unless `key` is already resident; returns the resident bitmap.
    ///
    /// The existing entry wins so every consumer ends up sharing one allocation.
    pub fn get_or_put(
        &mut self,
        key: ImageKey,
        bitmap: Arc<DecodedBitmap>,
    ) -> Arc<DecodedBitmap> {
        if let Some(existing) = self.entries.get(&key) {
            return Arc::clone(existing);
        }
        self.put(key, Arc::clone(&bitmap));
        bitmap
    }

    /// Remove an entry from the cache if present.
    pub fn remove(&mut self, key: &ImageKey) -> Option<Arc<DecodedBitmap>> {
        let removed = self.entries.remove(key);
        if let Some(ref entry) = removed {
            self.bytes_used = self.bytes_used.saturating_sub(entry.byte_cost());
        }
        removed
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.bytes_used = 0;
    }

    fn evict_if_needed(&mut self) {
        // The newest entry sits at the most-recent end and fits the budget on its own, so
        // it is never the one removed here.
        while self.bytes_used > self.budget.bytes_max && self.entries.len() > 1 {
            if let Some((key, oldest)) = self.entries.remove_lru() {
                self.bytes_used = self.bytes_used.saturating_sub(oldest.byte_cost());
                self.evictions += 1;
                debug!(target: "cache::memory", key = %key, cost = oldest.byte_cost(), "evicted");
            } else {
                break;
            }
        }
    }
}
