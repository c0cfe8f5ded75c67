//! # cgov-cache — Multi-Tier Cache
//!
//! Two tiers sit in front of the policy runtime:
//!
//! - **Hot** ([`HotTier`]): process-local, size-bounded, evicted in
//!   least-recently-used batches. Reads take a shard read lock only.
//! - **Shared** ([`SharedTier`]): an injected, possibly remote store with
//!   independent TTLs per data class. [`MemorySharedTier`] is the in-process
//!   implementation.
//!
//! Every entry records the bundle version it was produced under. Activation
//! of a new bundle calls [`MultiTierCache::invalidate_superseded`] and awaits
//! it before the bundle is advertised, and every decision read is checked
//! against the active version so a stale entry surfaces as
//! [`CacheError::Inconsistency`] instead of being served.

pub mod cache;
pub mod config;
pub mod entry;
pub mod error;
pub mod hot;
pub mod key;
pub mod shared;
pub mod stats;

pub use cache::{Lookup, MultiTierCache};
pub use config::CacheConfig;
pub use entry::{CacheEntry, CacheValue, CachedDecision, EntryMeta, Tier};
pub use error::CacheError;
pub use hot::HotTier;
pub use key::{decision_fingerprint, CacheKey, DataClass};
pub use shared::{MemorySharedTier, MetaPredicate, SharedRecord, SharedTier};
pub use stats::{CacheStats, TierStats};
