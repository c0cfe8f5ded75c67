//! Per-tier hit-rate and age statistics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Counters for one tier. Relaxed atomics: the numbers feed strategy
/// selection and metrics, never control flow that needs ordering.
#[derive(Debug, Default)]
pub(crate) struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    hit_age_ms_total: AtomicU64,
}

impl TierCounters {
    pub(crate) fn hit(&self, age_ms: u64) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.hit_age_ms_total.fetch_add(age_ms, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn evicted(&self, n: usize) {
        self.evictions.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn expired(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, entries: usize) -> TierStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let age_total = self.hit_age_ms_total.load(Ordering::Relaxed);
        TierStats {
            entries,
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            hit_rate: if hits + misses == 0 {
                0.0
            } else {
                hits as f64 / (hits + misses) as f64
            },
            mean_hit_age_ms: if hits == 0 { 0 } else { age_total / hits },
        }
    }
}

/// Snapshot of one tier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierStats {
    /// Entries currently held.
    pub entries: usize,
    /// Lookups served.
    pub hits: u64,
    /// Lookups not served.
    pub misses: u64,
    /// Entries evicted for capacity.
    pub evictions: u64,
    /// Entries dropped on TTL expiry.
    pub expirations: u64,
    /// `hits / (hits + misses)`, 0 before any lookup.
    pub hit_rate: f64,
    /// Mean age of entries at hit time.
    pub mean_hit_age_ms: u64,
}

/// Snapshot of the whole cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Hot tier.
    pub hot: TierStats,
    /// Shared tier.
    pub shared: TierStats,
    /// Stale decisions detected on read.
    pub inconsistencies: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_rate_and_mean_age() {
        let c = TierCounters::default();
        assert_eq!(c.snapshot(0).hit_rate, 0.0);
        c.hit(10);
        c.hit(30);
        c.miss();
        c.miss();
        let s = c.snapshot(2);
        assert_eq!(s.hit_rate, 0.5);
        assert_eq!(s.mean_hit_age_ms, 20);
        assert_eq!(s.entries, 2);
    }
}
