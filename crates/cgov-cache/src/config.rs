//! Cache configuration.

use std::time::Duration;

use cgov_core::ValidationError;
use serde::{Deserialize, Serialize};

use crate::key::DataClass;

/// Multi-tier cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum entries in the hot tier.
    pub hot_capacity: usize,
    /// Fraction of `hot_capacity` evicted per eviction pass.
    pub eviction_batch: f64,
    /// TTL for compiled bundles, seconds.
    pub bundle_ttl_secs: u64,
    /// TTL for enforcement decisions, milliseconds.
    pub decision_ttl_ms: u64,
    /// Write entries through to the shared tier.
    pub write_through: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            hot_capacity: 10_000,
            eviction_batch: 0.1,
            bundle_ttl_secs: 24 * 60 * 60,
            decision_ttl_ms: 30_000,
            write_through: true,
        }
    }
}

impl CacheConfig {
    /// Default TTL for a data class.
    pub fn ttl_for(&self, class: DataClass) -> Duration {
        match class {
            DataClass::Bundle => Duration::from_secs(self.bundle_ttl_secs),
            DataClass::Decision => Duration::from_millis(self.decision_ttl_ms),
        }
    }

    /// Check ranges.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.hot_capacity == 0 {
            return Err(ValidationError::InvalidConfig {
                field: "cache.hot_capacity".into(),
                reason: "must be at least 1".into(),
            });
        }
        if !(self.eviction_batch > 0.0 && self.eviction_batch <= 1.0) {
            return Err(ValidationError::InvalidConfig {
                field: "cache.eviction_batch".into(),
                reason: "must be in (0, 1]".into(),
            });
        }
        Ok(())
    }
}
