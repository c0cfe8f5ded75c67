//! Enforcement errors.

use cgov_core::{CgovError, Namespace, ValidationError};
use cgov_facts::FactError;
use thiserror::Error;

/// Errors that prevent a decision from being produced at all. Runtime
/// failures are not among them: those become failure decisions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnforcementError {
    /// No bundle is active for the namespace.
    #[error("no active bundle for namespace {0}")]
    NoActiveBundle(Namespace),

    /// A configured context goal does not parse.
    #[error("context goal '{name}' is invalid: {source}")]
    Goal {
        /// Goal name.
        name: String,
        /// Parse failure.
        #[source]
        source: FactError,
    },

    /// Configuration rejected at construction.
    #[error(transparent)]
    Config(#[from] ValidationError),
}

impl From<EnforcementError> for CgovError {
    fn from(err: EnforcementError) -> Self {
        match err {
            EnforcementError::NoActiveBundle(ns) => CgovError::NotFound(format!("active bundle for namespace {ns}")),
            EnforcementError::Goal { name, source } => CgovError::Validation(ValidationError::InvalidConfig {
                field: format!("enforcement.context_goals.{name}"),
                reason: source.to_string(),
            }),
            EnforcementError::Config(e) => CgovError::Validation(e),
        }
    }
}
