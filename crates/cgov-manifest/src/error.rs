//! Errors raised by manifest computation, the registry and version stores.

use cgov_core::{
    BundleVersion, CanonicalizationError, CgovError, IntegrityError, Namespace, RuleId,
    StateTransitionError,
};
use thiserror::Error;

/// Errors from the manifest manager.
#[derive(Error, Debug)]
pub enum ManifestError {
    /// Recomputed digests disagree with recorded ones.
    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    /// Digest input could not be canonicalized.
    #[error(transparent)]
    Canonicalization(#[from] CanonicalizationError),

    /// A rule or bundle lifecycle transition was rejected.
    #[error(transparent)]
    Transition(#[from] StateTransitionError),

    /// The requested version is not in the store.
    #[error("bundle {version} of namespace {namespace} not found")]
    VersionNotFound {
        /// Namespace searched.
        namespace: Namespace,
        /// Version requested.
        version: BundleVersion,
    },

    /// The rule is not known to the registry.
    #[error("rule {0} not found")]
    RuleNotFound(RuleId),

    /// A version was written twice.
    #[error("bundle {version} of namespace {namespace} already stored")]
    AlreadyStored {
        /// Namespace written.
        namespace: Namespace,
        /// Version written.
        version: BundleVersion,
    },

    /// A manifest without a bound bundle cannot be stored or verified.
    #[error("manifest for namespace {0} is not bound to a compiled bundle")]
    Unbound(Namespace),

    /// Filesystem store I/O failure.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored record could not be (de)serialized.
    #[error("store serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<ManifestError> for CgovError {
    fn from(err: ManifestError) -> Self {
        match err {
            ManifestError::Integrity(e) => CgovError::Integrity(e),
            ManifestError::Canonicalization(e) => CgovError::Canonicalization(e),
            ManifestError::Transition(e) => CgovError::StateTransition(e),
            ManifestError::Io(e) => CgovError::Io(e),
            ManifestError::Json(e) => CgovError::Json(e),
            other @ (ManifestError::VersionNotFound { .. } | ManifestError::RuleNotFound(_)) => {
                CgovError::NotFound(other.to_string())
            }
            other => CgovError::Integrity(IntegrityError {
                subject: "version store".into(),
                expected: "consistent store state".into(),
                actual: other.to_string(),
            }),
        }
    }
}
