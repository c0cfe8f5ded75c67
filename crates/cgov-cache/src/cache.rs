//! The two tiers behind one interface.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cgov_compiler::CompiledBundle;
use cgov_core::{BundleVersion, ContentDigest, Namespace};

use crate::config::CacheConfig;
use crate::entry::{CacheEntry, CacheValue, CachedDecision, EntryMeta, Tier};
use crate::error::CacheError;
use crate::hot::HotTier;
use crate::key::{CacheKey, DataClass};
use crate::shared::{MemorySharedTier, SharedRecord, SharedTier};
use crate::stats::{CacheStats, TierCounters};

/// Result of a lookup.
#[derive(Debug, Clone)]
pub enum Lookup {
    /// Served from a tier.
    Hit(CacheEntry),
    /// Not present, expired or unreadable.
    Miss,
}

impl Lookup {
    /// The entry, if hit.
    pub fn into_entry(self) -> Option<CacheEntry> {
        match self {
            Self::Hit(e) => Some(e),
            Self::Miss => None,
        }
    }
}

/// Hot tier in front of an injected shared tier.
pub struct MultiTierCache {
    config: CacheConfig,
    hot: HotTier,
    shared: Arc<dyn SharedTier>,
    shared_counters: TierCounters,
    inconsistencies: AtomicU64,
}

impl std::fmt::Debug for MultiTierCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiTierCache")
            .field("config", &self.config)
            .field("hot_entries", &self.hot.len())
            .finish_non_exhaustive()
    }
}

impl MultiTierCache {
    /// A cache over `shared`.
    pub fn new(config: CacheConfig, shared: Arc<dyn SharedTier>) -> Self {
        Self {
            hot: HotTier::new(config.hot_capacity, config.eviction_batch),
            config,
            shared,
            shared_counters: TierCounters::default(),
            inconsistencies: AtomicU64::new(0),
        }
    }

    /// A cache whose shared tier is in-process.
    pub fn in_memory(config: CacheConfig) -> Self {
        Self::new(config, Arc::new(MemorySharedTier::new()))
    }

    /// Active configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up `key`. `tier` is the deepest tier consulted: `Hot` reads
    /// only the hot tier; `Shared` falls through to the shared tier and
    /// promotes a hit into the hot tier. Shared-tier failures are misses.
    pub async fn get(&self, key: &CacheKey, tier: Tier) -> Lookup {
        let now = Utc::now();
        if let Some(entry) = self.hot.get(key, now) {
            return Lookup::Hit(entry);
        }
        if tier == Tier::Hot {
            return Lookup::Miss;
        }
        let record = match self.shared.get(key).await {
            Ok(Some(r)) if !r.meta.is_expired(now) => r,
            Ok(Some(_)) => {
                self.shared_counters.expired();
                self.shared_counters.miss();
                return Lookup::Miss;
            }
            Ok(None) => {
                self.shared_counters.miss();
                return Lookup::Miss;
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "shared tier read failed");
                self.shared_counters.miss();
                return Lookup::Miss;
            }
        };
        let value = match CacheValue::from_bytes(&record.payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "discarding undecodable shared entry");
                self.shared_counters.miss();
                return Lookup::Miss;
            }
        };
        self.shared_counters.hit(record.meta.age_ms(now));
        self.hot.insert(record.meta.clone(), value.clone());
        Lookup::Hit(CacheEntry {
            meta: record.meta,
            value,
            tier: Tier::Shared,
            hits: 1,
        })
    }

    /// Store `value` under `key`. `ttl` defaults to the key's data class TTL.
    /// The hot tier is always written; a shared-tier failure is returned
    /// after the hot write.
    pub async fn put(&self, key: CacheKey, value: CacheValue, ttl: Option<Duration>) -> Result<(), CacheError> {
        let ttl = ttl.unwrap_or_else(|| self.config.ttl_for(key.class()));
        let meta = EntryMeta::new(key, &value, Utc::now(), ttl);
        let record = if self.config.write_through {
            Some(SharedRecord {
                meta: meta.clone(),
                payload: value.to_bytes()?,
            })
        } else {
            None
        };
        self.hot.insert(meta, value);
        if let Some(record) = record {
            self.shared.put(record).await?;
        }
        Ok(())
    }

    /// Remove every entry, in both tiers, whose metadata matches.
    pub async fn invalidate<F>(&self, predicate: F) -> Result<usize, CacheError>
    where
        F: Fn(&EntryMeta) -> bool + Send + Sync,
    {
        let hot = self.hot.remove_where(&predicate);
        let shared = self.shared.remove_where(&predicate).await?;
        Ok(hot + shared)
    }

    /// Drop every decision in `namespace` produced under a bundle other than
    /// `active`. Completes in both tiers before returning; activation awaits
    /// it before advertising the new version.
    pub async fn invalidate_superseded(&self, namespace: &Namespace, active: BundleVersion) -> Result<usize, CacheError> {
        let removed = self
            .invalidate(|meta| {
                meta.key.class() == DataClass::Decision
                    && meta.key.namespace() == namespace
                    && meta.bundle_version != active
            })
            .await?;
        tracing::info!(namespace = %namespace, active = %active, removed, "invalidated superseded decisions");
        Ok(removed)
    }

    /// Check that a decision entry belongs to the active bundle.
    pub fn verify_consistency(&self, entry: &CacheEntry, active: BundleVersion) -> Result<(), CacheError> {
        if entry.meta.key.class() != DataClass::Decision || entry.meta.bundle_version == active {
            return Ok(());
        }
        self.inconsistencies.fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            key = %entry.meta.key,
            cached = %entry.meta.bundle_version,
            active = %active,
            tier = entry.tier.as_str(),
            "stale decision found after activation"
        );
        Err(CacheError::Inconsistency {
            key: entry.meta.key.to_string(),
            cached: entry.meta.bundle_version,
            active,
        })
    }

    /// Cached decision for a request fingerprint, checked against the active
    /// bundle. A stale entry is removed from both tiers and reported as
    /// [`CacheError::Inconsistency`].
    pub async fn get_decision(
        &self,
        namespace: &Namespace,
        fingerprint: ContentDigest,
        active: BundleVersion,
    ) -> Result<Option<(CachedDecision, Tier)>, CacheError> {
        let key = CacheKey::Decision {
            namespace: namespace.clone(),
            fingerprint,
        };
        let Lookup::Hit(entry) = self.get(&key, Tier::Shared).await else {
            return Ok(None);
        };
        if let Err(e) = self.verify_consistency(&entry, active) {
            self.hot.remove(&key);
            if let Err(shared) = self.shared.remove(&key).await {
                tracing::warn!(key = %key, error = %shared, "failed to drop stale shared entry");
            }
            return Err(e);
        }
        match entry.value {
            CacheValue::Decision(d) => Ok(Some((d, entry.tier))),
            CacheValue::Bundle(_) => Ok(None),
        }
    }

    /// Cache a decision for a request fingerprint.
    pub async fn put_decision(
        &self,
        namespace: &Namespace,
        fingerprint: ContentDigest,
        decision: CachedDecision,
    ) -> Result<(), CacheError> {
        let key = CacheKey::Decision {
            namespace: namespace.clone(),
            fingerprint,
        };
        self.put(key, CacheValue::Decision(decision), None).await
    }

    /// Cached bundle by version.
    pub async fn get_bundle(&self, namespace: &Namespace, version: BundleVersion) -> Option<Arc<CompiledBundle>> {
        let key = CacheKey::Bundle {
            namespace: namespace.clone(),
            version,
        };
        match self.get(&key, Tier::Shared).await.into_entry()?.value {
            CacheValue::Bundle(b) => Some(b),
            CacheValue::Decision(_) => None,
        }
    }

    /// Cache a compiled bundle.
    pub async fn put_bundle(&self, bundle: Arc<CompiledBundle>) -> Result<(), CacheError> {
        let key = CacheKey::Bundle {
            namespace: bundle.namespace.clone(),
            version: bundle.version,
        };
        self.put(key, CacheValue::Bundle(bundle), None).await
    }

    /// Statistics for both tiers.
    pub async fn stats(&self) -> CacheStats {
        let shared_entries = self.shared.len().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "shared tier size unavailable");
            0
        });
        CacheStats {
            hot: self.hot.stats(),
            shared: self.shared_counters.snapshot(shared_entries),
            inconsistencies: self.inconsistencies.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::MetaPredicate;
    use async_trait::async_trait;
    use cgov_core::sha256_raw;

    fn ns() -> Namespace {
        Namespace::new("ops").unwrap()
    }

    fn decision(v: u64) -> CachedDecision {
        CachedDecision {
            allow: true,
            allow_matches: vec![],
            deny_matches: vec![],
            bundle_version: BundleVersion(v),
            strategy: "standard".into(),
        }
    }

    fn cache() -> MultiTierCache {
        MultiTierCache::in_memory(CacheConfig::default())
    }

    #[tokio::test]
    async fn hot_miss_falls_through_and_promotes() {
        let shared = Arc::new(MemorySharedTier::new());
        let writer = MultiTierCache::new(CacheConfig::default(), shared.clone());
        let reader = MultiTierCache::new(CacheConfig::default(), shared);
        let fp = sha256_raw(b"req-1");
        writer.put_decision(&ns(), fp, decision(1)).await.unwrap();

        let key = CacheKey::Decision { namespace: ns(), fingerprint: fp };
        assert!(matches!(reader.get(&key, Tier::Hot).await, Lookup::Miss));
        match reader.get(&key, Tier::Shared).await {
            Lookup::Hit(e) => assert_eq!(e.tier, Tier::Shared),
            Lookup::Miss => panic!("expected shared hit"),
        }
        match reader.get(&key, Tier::Hot).await {
            Lookup::Hit(e) => assert_eq!(e.tier, Tier::Hot),
            Lookup::Miss => panic!("expected promoted hot hit"),
        }
        let stats = reader.stats().await;
        assert_eq!(stats.shared.hits, 1);
        assert_eq!(stats.hot.hits, 1);
        assert_eq!(stats.hot.misses, 2);
    }

    #[tokio::test]
    async fn no_stale_decision_after_activation() {
        let c = cache();
        for n in 0..5u8 {
            c.put_decision(&ns(), sha256_raw(&[n]), decision(1)).await.unwrap();
        }
        let other = Namespace::new("hr").unwrap();
        c.put_decision(&other, sha256_raw(b"x"), decision(1)).await.unwrap();

        let removed = c.invalidate_superseded(&ns(), BundleVersion(2)).await.unwrap();
        assert_eq!(removed, 10);
        for n in 0..5u8 {
            assert_eq!(c.get_decision(&ns(), sha256_raw(&[n]), BundleVersion(2)).await.unwrap(), None);
        }
        assert!(c.get_decision(&other, sha256_raw(b"x"), BundleVersion(1)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stale_read_is_detected_and_evicted() {
        let c = cache();
        let fp = sha256_raw(b"req");
        c.put_decision(&ns(), fp, decision(1)).await.unwrap();
        let err = c.get_decision(&ns(), fp, BundleVersion(2)).await.unwrap_err();
        assert!(matches!(err, CacheError::Inconsistency { cached: BundleVersion(1), active: BundleVersion(2), .. }));
        assert_eq!(c.stats().await.inconsistencies, 1);
        assert_eq!(c.get_decision(&ns(), fp, BundleVersion(2)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn bundles_survive_decision_invalidation() {
        let c = cache();
        let compiler = cgov_compiler::IncrementalCompiler::new(Default::default()).unwrap();
        let bundle = compiler
            .compile_full(&ns(), &Default::default(), BundleVersion(1))
            .unwrap()
            .bundle;
        c.put_bundle(Arc::new(bundle)).await.unwrap();
        c.invalidate_superseded(&ns(), BundleVersion(2)).await.unwrap();
        let cached = c.get_bundle(&ns(), BundleVersion(1)).await.unwrap();
        assert_eq!(cached.version, BundleVersion(1));
    }

    #[tokio::test]
    async fn explicit_ttl_overrides_class_default() {
        let c = cache();
        let key = CacheKey::Decision { namespace: ns(), fingerprint: sha256_raw(b"t") };
        c.put(key.clone(), CacheValue::Decision(decision(1)), Some(Duration::ZERO)).await.unwrap();
        assert!(matches!(c.get(&key, Tier::Shared).await, Lookup::Miss));
    }

    struct Unavailable;

    #[async_trait]
    impl SharedTier for Unavailable {
        async fn get(&self, _: &CacheKey) -> Result<Option<SharedRecord>, CacheError> {
            Err(CacheError::Shared("connection refused".into()))
        }
        async fn put(&self, _: SharedRecord) -> Result<(), CacheError> {
            Err(CacheError::Shared("connection refused".into()))
        }
        async fn remove(&self, _: &CacheKey) -> Result<bool, CacheError> {
            Err(CacheError::Shared("connection refused".into()))
        }
        async fn remove_where(&self, _: &MetaPredicate<'_>) -> Result<usize, CacheError> {
            Err(CacheError::Shared("connection refused".into()))
        }
        async fn len(&self) -> Result<usize, CacheError> {
            Err(CacheError::Shared("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn shared_outage_degrades_to_hot_tier() {
        let c = MultiTierCache::new(CacheConfig::default(), Arc::new(Unavailable));
        let fp = sha256_raw(b"req");
        assert!(c.put_decision(&ns(), fp, decision(1)).await.is_err());
        assert!(c.get_decision(&ns(), fp, BundleVersion(1)).await.unwrap().is_some());
        assert!(c.invalidate_superseded(&ns(), BundleVersion(2)).await.is_err());
        assert_eq!(c.stats().await.shared.entries, 0);
    }
}
