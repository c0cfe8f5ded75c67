//! Shared tier: the seam for a distributed cache.
//!
//! Values cross this boundary serialized, the way they would travel to a
//! remote store. Implementations must honour `expires_at` on read.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::entry::EntryMeta;
use crate::error::CacheError;
use crate::key::CacheKey;

/// Metadata filter for bulk removal.
pub type MetaPredicate<'p> = dyn for<'m> Fn(&'m EntryMeta) -> bool + Send + Sync + 'p;

/// A serialized entry in the shared tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedRecord {
    /// Entry metadata.
    pub meta: EntryMeta,
    /// Output of [`crate::CacheValue::to_bytes`].
    pub payload: Vec<u8>,
}

/// Shared cache backend.
#[async_trait]
pub trait SharedTier: Send + Sync {
    /// Fetch an unexpired record.
    async fn get(&self, key: &CacheKey) -> Result<Option<SharedRecord>, CacheError>;

    /// Store or replace a record.
    async fn put(&self, record: SharedRecord) -> Result<(), CacheError>;

    /// Remove one key. Returns whether it was present.
    async fn remove(&self, key: &CacheKey) -> Result<bool, CacheError>;

    /// Remove every record whose metadata matches. Returns the count.
    async fn remove_where(&self, predicate: &MetaPredicate<'_>) -> Result<usize, CacheError>;

    /// Records held.
    async fn len(&self) -> Result<usize, CacheError>;
}

/// In-process [`SharedTier`].
#[derive(Debug, Default)]
pub struct MemorySharedTier {
    records: RwLock<HashMap<CacheKey, SharedRecord>>,
}

impl MemorySharedTier {
    /// An empty tier.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SharedTier for MemorySharedTier {
    async fn get(&self, key: &CacheKey) -> Result<Option<SharedRecord>, CacheError> {
        let now = Utc::now();
        {
            let records = self.records.read();
            match records.get(key) {
                None => return Ok(None),
                Some(r) if !r.meta.is_expired(now) => return Ok(Some(r.clone())),
                Some(_) => {}
            }
        }
        self.records.write().remove(key);
        Ok(None)
    }

    async fn put(&self, record: SharedRecord) -> Result<(), CacheError> {
        self.records.write().insert(record.meta.key.clone(), record);
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> Result<bool, CacheError> {
        Ok(self.records.write().remove(key).is_some())
    }

    async fn remove_where(&self, predicate: &MetaPredicate<'_>) -> Result<usize, CacheError> {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|_, r| !predicate(&r.meta));
        Ok(before - records.len())
    }

    async fn len(&self) -> Result<usize, CacheError> {
        Ok(self.records.read().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{CacheValue, CachedDecision};
    use cgov_core::{BundleVersion, Namespace};
    use std::time::Duration;

    fn record(ttl: Duration) -> SharedRecord {
        let value = CacheValue::Decision(CachedDecision {
            allow: true,
            allow_matches: vec![],
            deny_matches: vec![],
            bundle_version: BundleVersion(1),
            strategy: "standard".into(),
        });
        let key = CacheKey::Decision {
            namespace: Namespace::new("ops").unwrap(),
            fingerprint: cgov_core::sha256_raw(b"req"),
        };
        SharedRecord {
            meta: EntryMeta::new(key, &value, Utc::now(), ttl),
            payload: value.to_bytes().unwrap(),
        }
    }

    #[tokio::test]
    async fn put_get_remove() {
        let tier = MemorySharedTier::new();
        let r = record(Duration::from_secs(60));
        tier.put(r.clone()).await.unwrap();
        assert_eq!(tier.get(&r.meta.key).await.unwrap(), Some(r.clone()));
        assert!(tier.remove(&r.meta.key).await.unwrap());
        assert_eq!(tier.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn expired_records_are_not_returned() {
        let tier = MemorySharedTier::new();
        let r = record(Duration::ZERO);
        tier.put(r.clone()).await.unwrap();
        assert_eq!(tier.get(&r.meta.key).await.unwrap(), None);
        assert_eq!(tier.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn remove_where_accepts_borrowing_predicate() {
        let tier = MemorySharedTier::new();
        tier.put(record(Duration::from_secs(60))).await.unwrap();
        let keep = BundleVersion(2);
        let stale = |m: &EntryMeta| m.bundle_version != keep;
        assert_eq!(tier.remove_where(&stale).await.unwrap(), 1);
        assert_eq!(tier.remove_where(&stale).await.unwrap(), 0);
    }
}
