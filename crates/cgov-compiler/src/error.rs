//! Compilation errors.

use cgov_core::{CanonicalizationError, CgovError, IntegrityError, Namespace, RuleId, ValidationError};
use cgov_manifest::ManifestError;
use thiserror::Error;

/// Errors from the incremental compiler.
#[derive(Error, Debug)]
pub enum CompileError {
    /// The dependency graph has a cycle. Every rule on it is listed, with the
    /// first rule repeated at the end.
    #[error("dependency cycle: {}", .rules.iter().map(RuleId::as_str).collect::<Vec<_>>().join(" -> "))]
    Cycle {
        /// Rules on the cycle, in traversal order.
        rules: Vec<RuleId>,
    },

    /// The change set names a rule the rule set does not contain.
    #[error("changed rule {0} is not in the rule set")]
    UnknownRule(RuleId),

    /// The existing bundle belongs to another namespace.
    #[error("existing bundle belongs to namespace {found}, expected {expected}")]
    NamespaceMismatch {
        /// Namespace being compiled.
        expected: Namespace,
        /// Namespace of the bundle passed in.
        found: Namespace,
    },

    /// Assembled bundle text failed to parse.
    #[error("assembled bundle is not valid policy text: {0}")]
    InvalidBundle(String),

    /// Manifest computation failed.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// A digest did not verify.
    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    /// Digest input could not be canonicalized.
    #[error(transparent)]
    Canonicalization(#[from] CanonicalizationError),

    /// Invalid compiler configuration.
    #[error(transparent)]
    Config(#[from] ValidationError),
}

impl From<CompileError> for CgovError {
    fn from(err: CompileError) -> Self {
        match err {
            CompileError::Cycle { rules } => CgovError::Cycle { rules },
            CompileError::Manifest(e) => e.into(),
            CompileError::Integrity(e) => CgovError::Integrity(e),
            CompileError::Canonicalization(e) => CgovError::Canonicalization(e),
            CompileError::Config(e) => CgovError::Validation(e),
            other => CgovError::Validation(ValidationError::InvalidConfig {
                field: "compile".into(),
                reason: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_maps_to_top_level_cycle() {
        let ids: Vec<RuleId> = ["a", "b", "a"].iter().map(|s| RuleId::new(*s).unwrap()).collect();
        let err = CompileError::Cycle { rules: ids };
        assert_eq!(err.to_string(), "dependency cycle: a -> b -> a");
        match CgovError::from(err) {
            CgovError::Cycle { rules } => assert_eq!(rules.len(), 3),
            other => panic!("unexpected {other:?}"),
        }
    }
}
