//! Conflict resolution errors.

use cgov_core::{CanonicalizationError, CgovError, RuleId, StateTransitionError, ValidationError};
use thiserror::Error;

use crate::conflict::ConflictSeverity;
use crate::escalation::{EscalationId, EscalationState};

/// Errors raised while resolving conflicts.
#[derive(Error, Debug)]
pub enum ConflictError {
    /// No escalation with this id.
    #[error("escalation {0} not found")]
    EscalationNotFound(EscalationId),

    /// The escalation has already been closed.
    #[error("escalation {id} is already {state}")]
    AlreadyClosed {
        /// Escalation id.
        id: EscalationId,
        /// Its terminal state.
        state: EscalationState,
    },

    /// A downgrade must lower the severity.
    #[error("cannot downgrade a {from} conflict to {to}")]
    InvalidDowngrade {
        /// Current severity.
        from: ConflictSeverity,
        /// Requested severity.
        to: ConflictSeverity,
    },

    /// A patch names a rule that is not in the staged set.
    #[error("patch target {0} is not in the rule set")]
    PatchTarget(RuleId),

    /// Rebuilding a patched rule failed.
    #[error(transparent)]
    Canonicalization(#[from] CanonicalizationError),
}

impl From<ConflictError> for CgovError {
    fn from(err: ConflictError) -> Self {
        match err {
            ConflictError::EscalationNotFound(id) => CgovError::NotFound(format!("escalation {id}")),
            ConflictError::PatchTarget(id) => CgovError::NotFound(format!("rule {id}")),
            ConflictError::AlreadyClosed { id, state } => {
                CgovError::StateTransition(StateTransitionError::InvalidTransition {
                    subject: format!("escalation {id}"),
                    from: state.to_string(),
                    to: "resolved".into(),
                })
            }
            ConflictError::InvalidDowngrade { from, to } => CgovError::Validation(ValidationError::InvalidConfig {
                field: "severity".into(),
                reason: format!("cannot downgrade {from} to {to}"),
            }),
            ConflictError::Canonicalization(e) => CgovError::Canonicalization(e),
        }
    }
}
