// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Subscriber-Set Pool
//!
//! Hash-consing cache that makes nodes with identical subscriber multisets
//! share one immutable [`SubscriberSet`].
//!
//! # Flow
//!
//! ```text
//! resolve(current, session, delta)
//!       │
//!       ├─→ delta == 0                → current
//!       ├─→ result would be empty     → canonical empty set
//!       │
//!       ▼
//! ┌──────────────────────────────────┐
//! │  hash = current.hash_with(..)    │  (no allocation)
//! │  bucket = cache[hash]            │
//! │  exact equality per candidate    │
//! └──────────────────────────────────┘
//!       │
//!       ├─→ Hit  → shared Arc
//!       └─→ Miss → build, insert, return
//! ```
//!
//! # Bounding
//!
//! The cache aims to hold at most `max_cached_sets` hash buckets,
//! recency-ordered. Only sets that no node references any more are ever
//! dropped: a bucket at the LRU end whose sets are all dead goes first, then
//! a full sweep. A live set is never evicted, since a later resolve to the
//! same content would then build a second instance and two nodes with equal
//! subscribers would stop sharing one. When every cached set is live the
//! cache grows past its bound instead, and the next full sweep is deferred
//! until it has grown by half again, so sweeps stay amortized O(1) per miss.

use std::sync::Arc;

use lru::LruCache;
use tracing::{debug, warn};

use super::subscriber_set::{SubscriberSet, SubscriberSetRef};
use crate::error::Result;
use crate::session_id::SessionId;

/// Pool statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolStats {
    /// Resolves answered from the cache
    pub hits: u64,
    /// Resolves that built a new set
    pub misses: u64,
    /// Dead sets dropped from the LRU end of the cache
    pub evictions: u64,
    /// Dead sets dropped by full sweeps
    pub swept: u64,
    /// Full sweeps run
    pub sweeps: u64,
    /// Times the cache had to grow past its bound because every set was live
    pub overflows: u64,
    /// Sets served uncached because the cache could not grow
    pub degraded: u64,
    /// Sets currently cached
    pub cached_sets: usize,
}

pub struct SubscriberSetPool {
    /// content hash → sets with that hash (collision chain)
    cache: LruCache<u64, Vec<SubscriberSetRef>>,
    /// Canonical empty set
    empty: SubscriberSetRef,
    /// Soft bound on cached buckets
    max_cached_sets: usize,
    /// Bucket count at which the next full sweep runs
    sweep_at: usize,
    /// Larger sets are built but not cached
    max_cacheable_set_size: usize,
    stats: PoolStats,
}

impl SubscriberSetPool {
    pub fn new(max_cached_sets: usize, max_cacheable_set_size: usize) -> Self {
        let max_cached_sets = max_cached_sets.max(1);
        Self {
            cache: LruCache::unbounded(),
            empty: Arc::new(SubscriberSet::new()),
            max_cached_sets,
            sweep_at: max_cached_sets,
            max_cacheable_set_size,
            stats: PoolStats::default(),
        }
    }

    /// The canonical empty set. Every node starts with this.
    pub fn empty_set(&self) -> SubscriberSetRef {
        Arc::clone(&self.empty)
    }

    /// Return the set equal to `current` with `session`'s count adjusted by
    /// `delta` (clamped at zero).
    ///
    /// `current` is never modified.
    pub fn resolve(
        &mut self,
        current: &SubscriberSetRef,
        session: &SessionId,
        delta: i64,
    ) -> Result<SubscriberSetRef> {
        if delta == 0 {
            return Ok(Arc::clone(current));
        }

        let old = current.count(session.as_str());
        let new = clamp_count(i64::from(old).saturating_add(delta));
        if new == old {
            return Ok(Arc::clone(current));
        }

        let target_len = current.len_with(session.as_str(), new);
        if target_len == 0 {
            return Ok(self.empty_set());
        }

        let hash = current.hash_with(session, new);
        let cacheable = target_len <= self.max_cacheable_set_size;

        if cacheable {
            if let Some(bucket) = self.cache.get(&hash) {
                if let Some(hit) = bucket.iter().find(|c| current.equals_with(c, session, new)) {
                    self.stats.hits += 1;
                    crate::metrics::record_pool_lookup(true);
                    return Ok(Arc::clone(hit));
                }
            }
        }

        self.stats.misses += 1;
        crate::metrics::record_pool_lookup(false);

        let set = Arc::new(current.with_count(session, new)?);
        if cacheable {
            self.insert(hash, Arc::clone(&set));
        }
        Ok(set)
    }

    fn insert(&mut self, hash: u64, set: SubscriberSetRef) {
        if let Some(bucket) = self.cache.get_mut(&hash) {
            if bucket.try_reserve(1).is_err() {
                self.stats.degraded += 1;
                warn!(hash, "Subscriber-set bucket could not grow; serving set uncached");
                return;
            }
            bucket.push(set);
            return;
        }

        if self.cache.len() >= self.max_cached_sets {
            self.make_room();
        }
        let mut bucket = Vec::new();
        if bucket.try_reserve_exact(1).is_err() {
            self.stats.degraded += 1;
            warn!(hash, "Subscriber-set bucket allocation failed; serving set uncached");
            return;
        }
        bucket.push(set);
        self.cache.put(hash, bucket);
        crate::metrics::set_pool_cached_sets(self.cached_sets());
    }

    /// Make room for one more bucket without dropping anything a node holds.
    fn make_room(&mut self) {
        // Cheap path: dead buckets at the LRU end
        while self.cache.len() >= self.max_cached_sets {
            let dead = match self.cache.peek_lru() {
                Some((_, bucket)) => bucket.iter().all(is_unreferenced),
                None => false,
            };
            if !dead {
                break;
            }
            if let Some((hash, bucket)) = self.cache.pop_lru() {
                self.stats.evictions += bucket.len() as u64;
                crate::metrics::record_pool_evictions(bucket.len());
                debug!(hash, sets = bucket.len(), "Evicted unreferenced subscriber-set bucket");
            }
        }
        if self.cache.len() < self.max_cached_sets || self.cache.len() < self.sweep_at {
            return;
        }

        let swept = self.sweep_unreferenced();
        let live = self.cache.len();
        self.sweep_at = live + live.max(self.max_cached_sets) / 2 + 1;
        if live >= self.max_cached_sets {
            self.stats.overflows += 1;
            warn!(
                live,
                bound = self.max_cached_sets,
                swept,
                next_sweep_at = self.sweep_at,
                "Every cached subscriber set is live; growing past the pool bound"
            );
        }
    }

    /// Drop every cached set that only the cache itself still holds.
    /// Returns the number of sets dropped.
    pub fn sweep_unreferenced(&mut self) -> usize {
        self.stats.sweeps += 1;
        self.retain_sets(|set| !is_unreferenced(set))
    }

    /// Drop every cached set that mentions `session`.
    ///
    /// Used on detach, after the session's counts have been purged from the
    /// tree, so nothing should still reference these sets.
    pub fn drop_entries_containing(&mut self, session: &SessionId) -> usize {
        let dropped = self.retain_sets(|set| !set.contains(session.as_str()));
        if dropped > 0 {
            debug!(session = %session, dropped, "Dropped pooled subscriber sets for session");
        }
        dropped
    }

    fn retain_sets(&mut self, mut keep: impl FnMut(&SubscriberSetRef) -> bool) -> usize {
        let mut dropped = 0;
        let mut empty_buckets = Vec::new();
        for (hash, bucket) in self.cache.iter_mut() {
            let before = bucket.len();
            bucket.retain(|s| keep(s));
            dropped += before - bucket.len();
            if bucket.is_empty() {
                empty_buckets.push(*hash);
            }
        }
        for hash in empty_buckets {
            self.cache.pop(&hash);
        }
        self.stats.swept += dropped as u64;
        crate::metrics::set_pool_cached_sets(self.cached_sets());
        dropped
    }

    /// Number of sets currently cached (across all buckets).
    pub fn cached_sets(&self) -> usize {
        self.cache.iter().map(|(_, b)| b.len()).sum()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            cached_sets: self.cached_sets(),
            ..self.stats.clone()
        }
    }

    /// Change the bucket bound. Shrinking sweeps unreferenced sets; live
    /// sets stay cached.
    pub fn resize(&mut self, max_cached_sets: usize, max_cacheable_set_size: usize) {
        self.max_cached_sets = max_cached_sets.max(1);
        self.max_cacheable_set_size = max_cacheable_set_size;
        if self.cache.len() > self.max_cached_sets {
            self.sweep_unreferenced();
        }
        let live = self.cache.len();
        self.sweep_at = if live >= self.max_cached_sets {
            live + live / 2 + 1
        } else {
            self.max_cached_sets
        };
    }
}

/// Only the cache's own reference remains.
fn is_unreferenced(set: &SubscriberSetRef) -> bool {
    Arc::strong_count(set) == 1
}

fn clamp_count(count: i64) -> u32 {
    u32::try_from(count.max(0)).unwrap_or(u32::MAX)
}
