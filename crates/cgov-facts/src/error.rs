//! Fact program errors.

use cgov_core::{CgovError, ValidationError};
use thiserror::Error;

/// Errors from parsing or evaluating a fact program.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FactError {
    /// The program text does not parse.
    #[error("syntax error at {line}:{column}: {message}")]
    Syntax {
        /// 1-based line.
        line: usize,
        /// 1-based column.
        column: usize,
        /// What was expected.
        message: String,
    },

    /// A fact contains a variable.
    #[error("fact {0} is not ground")]
    NonGroundFact(String),

    /// A variable in a rule head, negation or comparison is not bound by a
    /// positive body atom.
    #[error("rule {rule} is unsafe: variable {variable} is not bound by a positive literal")]
    Unsafe {
        /// The rule, rendered.
        rule: String,
        /// The unbound variable.
        variable: String,
    },

    /// A predicate is used with different arities.
    #[error("predicate {predicate} used with arity {found}, previously {expected}")]
    Arity {
        /// Predicate name.
        predicate: String,
        /// First arity seen.
        expected: usize,
        /// Conflicting arity.
        found: usize,
    },

    /// A predicate depends negatively on itself.
    #[error("negation cycle through predicate {0}")]
    Unstratifiable(String),

    /// Saturation exceeded the configured bound.
    #[error("derivation exceeded {limit} {what}")]
    LimitExceeded {
        /// The bound.
        limit: usize,
        /// `facts` or `rounds`.
        what: &'static str,
    },
}

impl From<FactError> for CgovError {
    fn from(err: FactError) -> Self {
        CgovError::Validation(ValidationError::InvalidConfig {
            field: "facts".into(),
            reason: err.to_string(),
        })
    }
}
