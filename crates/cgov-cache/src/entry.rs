//! Cached values and entry metadata.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use cgov_compiler::CompiledBundle;
use cgov_core::{BundleVersion, RuleId};
use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::key::CacheKey;

/// Cache tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Process-local LRU tier.
    Hot,
    /// Shared tier.
    Shared,
}

impl Tier {
    /// Lowercase name, used as a metrics label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hot => "hot",
            Self::Shared => "shared",
        }
    }
}

/// A decision as stored in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedDecision {
    /// Final outcome.
    pub allow: bool,
    /// Matched allow rules. Empty when the trace was omitted.
    pub allow_matches: Vec<RuleId>,
    /// Matched deny rules. Empty when the trace was omitted.
    pub deny_matches: Vec<RuleId>,
    /// Bundle that produced the decision.
    pub bundle_version: BundleVersion,
    /// Strategy that produced the decision.
    pub strategy: String,
}

/// A cached value.
#[derive(Debug, Clone)]
pub enum CacheValue {
    /// A compiled bundle.
    Bundle(Arc<CompiledBundle>),
    /// An enforcement decision.
    Decision(CachedDecision),
}

#[derive(Serialize)]
enum WireRef<'a> {
    Bundle(&'a CompiledBundle),
    Decision(&'a CachedDecision),
}

#[derive(Deserialize)]
enum WireOwned {
    Bundle(CompiledBundle),
    Decision(CachedDecision),
}

impl CacheValue {
    /// Bundle version the value belongs to.
    pub fn bundle_version(&self) -> BundleVersion {
        match self {
            Self::Bundle(b) => b.version,
            Self::Decision(d) => d.bundle_version,
        }
    }

    /// Serialized form for the shared tier.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CacheError> {
        let wire = match self {
            Self::Bundle(b) => WireRef::Bundle(b),
            Self::Decision(d) => WireRef::Decision(d),
        };
        serde_json::to_vec(&wire).map_err(|e| CacheError::Serialization(e.to_string()))
    }

    /// Inverse of [`CacheValue::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CacheError> {
        match serde_json::from_slice(bytes).map_err(|e| CacheError::Serialization(e.to_string()))? {
            WireOwned::Bundle(b) => Ok(Self::Bundle(Arc::new(b))),
            WireOwned::Decision(d) => Ok(Self::Decision(d)),
        }
    }
}

/// Metadata stored alongside every value in every tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    /// Entry key.
    pub key: CacheKey,
    /// Bundle version the value belongs to.
    pub bundle_version: BundleVersion,
    /// Insertion time.
    pub inserted_at: DateTime<Utc>,
    /// Expiry time.
    pub expires_at: DateTime<Utc>,
}

impl EntryMeta {
    /// Metadata for `value` stored at `now` for `ttl`.
    pub fn new(key: CacheKey, value: &CacheValue, now: DateTime<Utc>, ttl: std::time::Duration) -> Self {
        let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
        Self {
            key,
            bundle_version: value.bundle_version(),
            inserted_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Whether the entry has expired at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Age at `now` in milliseconds.
    pub fn age_ms(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from((now - self.inserted_at).num_milliseconds()).unwrap_or(0)
    }
}

/// A cache hit.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Entry metadata.
    pub meta: EntryMeta,
    /// The value.
    pub value: CacheValue,
    /// Tier that served the hit.
    pub tier: Tier,
    /// Hits on this entry in the serving tier, including this one.
    pub hits: u64,
}
