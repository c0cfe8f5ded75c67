//! Engine errors.

use cgov_cache::CacheError;
use cgov_compiler::CompileError;
use cgov_conflict::ConflictError;
use cgov_core::{CanonicalizationError, CgovError, FormatError, IntegrityError, ValidationError};
use cgov_enforcement::EnforcementError;
use cgov_facts::FactError;
use cgov_manifest::ManifestError;
use cgov_runtime::RuntimeError;
use thiserror::Error;

/// Errors from engine operations. Each maps onto one [`CgovError`] kind.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A submitted rule was rejected by the format router.
    #[error("rule {rule}: {source}")]
    Format {
        /// Submitted identifier.
        rule: String,
        /// Router error.
        #[source]
        source: FormatError,
    },

    /// Manifest, registry or store failure.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// A bundle failed verification against its manifest.
    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    /// Compilation failed.
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// Conflict resolution failed.
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    /// Activation is blocked by unresolved conflicts.
    #[error("activation blocked by {} unresolved conflict(s): {description}", .conflict_ids.len())]
    Blocked {
        /// Blocking conflict ids.
        conflict_ids: Vec<String>,
        /// Summary.
        description: String,
    },

    /// The runtime could not be reached.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// Cache invalidation failed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Enforcement could not produce a decision.
    #[error(transparent)]
    Enforcement(#[from] EnforcementError),

    /// The context program is invalid.
    #[error(transparent)]
    Facts(#[from] FactError),

    /// A rule could not be rebuilt.
    #[error(transparent)]
    Canonicalization(#[from] CanonicalizationError),

    /// Invalid configuration or request value.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Configuration file could not be parsed.
    #[error("configuration parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metrics registry failure.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// A namespace, version or escalation does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<EngineError> for CgovError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Format { source, .. } => CgovError::Format(source),
            EngineError::Manifest(e) => e.into(),
            EngineError::Integrity(e) => CgovError::Integrity(e),
            EngineError::Compile(e) => e.into(),
            EngineError::Conflict(e) => e.into(),
            EngineError::Blocked {
                conflict_ids,
                description,
            } => CgovError::ConflictBlocking {
                conflict_ids,
                description,
            },
            EngineError::Runtime(e) => e.into(),
            EngineError::Cache(e) => e.into(),
            EngineError::Enforcement(e) => e.into(),
            EngineError::Facts(e) => e.into(),
            EngineError::Canonicalization(e) => CgovError::Canonicalization(e),
            EngineError::Validation(e) => CgovError::Validation(e),
            EngineError::Yaml(e) => CgovError::Validation(ValidationError::InvalidConfig {
                field: "config".into(),
                reason: e.to_string(),
            }),
            EngineError::Io(e) => CgovError::Io(e),
            EngineError::Metrics(e) => CgovError::Io(std::io::Error::other(e.to_string())),
            EngineError::NotFound(what) => CgovError::NotFound(what),
        }
    }
}
