//! Cache errors.

use cgov_core::{BundleVersion, CgovError};
use thiserror::Error;

/// Errors raised by the cache.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// A decision cached under a superseded bundle version was found.
    #[error("stale entry {key}: cached under {cached}, active is {active}")]
    Inconsistency {
        /// Rendered cache key.
        key: String,
        /// Version recorded on the entry.
        cached: BundleVersion,
        /// Active version at lookup time.
        active: BundleVersion,
    },

    /// The shared tier failed.
    #[error("shared tier error: {0}")]
    Shared(String),

    /// A cached value failed to serialize for the shared tier.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<CacheError> for CgovError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Inconsistency { key, cached, active } => CgovError::CacheInconsistency {
                key,
                cached_version: cached.get(),
                active_version: active.get(),
            },
            other => CgovError::Io(std::io::Error::other(other.to_string())),
        }
    }
}
