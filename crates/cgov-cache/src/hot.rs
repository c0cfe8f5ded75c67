//! Process-local hot tier.
//!
//! A `DashMap` keyed by [`CacheKey`]; reads take a shard read lock and bump
//! an atomic access tick, writes lock one shard. When an insert would
//! exceed capacity the oldest `eviction_batch` fraction of entries (by last
//! access tick) is evicted in one pass, which amortizes the sort.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::entry::{CacheEntry, CacheValue, EntryMeta, Tier};
use crate::key::CacheKey;
use crate::stats::{TierCounters, TierStats};

#[derive(Debug)]
struct Slot {
    meta: EntryMeta,
    value: CacheValue,
    last_access: AtomicU64,
    hits: AtomicU64,
}

/// Size-bounded LRU tier.
#[derive(Debug)]
pub struct HotTier {
    map: DashMap<CacheKey, Slot>,
    capacity: usize,
    batch: usize,
    tick: AtomicU64,
    counters: TierCounters,
}

impl HotTier {
    /// A tier holding at most `capacity` entries, evicting
    /// `ceil(capacity * eviction_batch)` at a time.
    pub fn new(capacity: usize, eviction_batch: f64) -> Self {
        let capacity = capacity.max(1);
        let batch = ((capacity as f64 * eviction_batch).ceil() as usize).clamp(1, capacity);
        Self {
            map: DashMap::new(),
            capacity,
            batch,
            tick: AtomicU64::new(0),
            counters: TierCounters::default(),
        }
    }

    fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed)
    }

    /// Look up `key`, dropping it if expired.
    pub fn get(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<CacheEntry> {
        let expired = match self.map.get(key) {
            None => {
                self.counters.miss();
                return None;
            }
            Some(slot) if !slot.meta.is_expired(now) => {
                slot.last_access.store(self.next_tick(), Ordering::Relaxed);
                let hits = slot.hits.fetch_add(1, Ordering::Relaxed) + 1;
                self.counters.hit(slot.meta.age_ms(now));
                return Some(CacheEntry {
                    meta: slot.meta.clone(),
                    value: slot.value.clone(),
                    tier: Tier::Hot,
                    hits,
                });
            }
            Some(_) => true,
        };
        if expired && self.map.remove_if(key, |_, s| s.meta.is_expired(now)).is_some() {
            self.counters.expired();
        }
        self.counters.miss();
        None
    }

    /// Insert or replace an entry, evicting first when full.
    pub fn insert(&self, meta: EntryMeta, value: CacheValue) {
        if !self.map.contains_key(&meta.key) && self.map.len() >= self.capacity {
            self.evict();
        }
        let slot = Slot {
            meta,
            value,
            last_access: AtomicU64::new(self.next_tick()),
            hits: AtomicU64::new(0),
        };
        self.map.insert(slot.meta.key.clone(), slot);
    }

    fn evict(&self) {
        let mut by_age: Vec<(u64, CacheKey)> = self
            .map
            .iter()
            .map(|e| (e.last_access.load(Ordering::Relaxed), e.key().clone()))
            .collect();
        by_age.sort_unstable();
        let mut evicted = 0;
        for (_, key) in by_age.into_iter().take(self.batch) {
            if self.map.remove(&key).is_some() {
                evicted += 1;
            }
        }
        self.counters.evicted(evicted);
        tracing::debug!(evicted, capacity = self.capacity, "hot tier eviction");
    }

    /// Remove one key.
    pub fn remove(&self, key: &CacheKey) -> bool {
        self.map.remove(key).is_some()
    }

    /// Remove every entry whose metadata matches. Returns the count.
    pub fn remove_where(&self, predicate: impl Fn(&EntryMeta) -> bool) -> usize {
        let before = self.map.len();
        self.map.retain(|_, slot| !predicate(&slot.meta));
        before.saturating_sub(self.map.len())
    }

    /// Entries held.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the tier is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> TierStats {
        self.counters.snapshot(self.map.len())
    }
}
