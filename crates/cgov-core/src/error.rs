//! # Error Taxonomy
//!
//! Structured error types for the whole engine, built with `thiserror`.
//!
//! The top-level [`CgovError`] mirrors the failure classes the pipeline must
//! distinguish: unparseable input, integrity violations, dependency cycles,
//! blocking conflicts, an unreachable runtime, and stale cached decisions.
//! Each variant carries the offending identifiers so the caller can act on
//! the failure without re-running the pipeline.

use thiserror::Error;

use crate::lang::SyntaxError;
use crate::rule::{RuleId, SourceFormat};

/// Top-level error type for the engine.
#[derive(Error, Debug)]
pub enum CgovError {
    /// Rule input could not be parsed or uses an unsupported construct.
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    /// A recomputed digest does not match the recorded one.
    #[error("integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    /// The dependency graph contains a cycle. Every rule on the cycle is listed.
    #[error("dependency cycle detected: {}", format_cycle(.rules))]
    Cycle {
        /// Rules participating in the cycle, in traversal order.
        rules: Vec<RuleId>,
    },

    /// At least one unresolved blocking conflict prevents activation.
    #[error("activation blocked by {} unresolved conflict(s): {description}", .conflict_ids.len())]
    ConflictBlocking {
        /// Identifiers of the blocking conflicts.
        conflict_ids: Vec<String>,
        /// Human-readable summary of the conflicts.
        description: String,
    },

    /// The external policy-evaluation runtime could not be reached.
    #[error("policy runtime unavailable during {operation} after {attempts} attempt(s): {reason}")]
    RuntimeUnavailable {
        /// The runtime operation that failed (push, query, health).
        operation: String,
        /// Number of attempts made, including retries.
        attempts: u32,
        /// Last observed failure.
        reason: String,
    },

    /// A cached decision was tagged with a superseded bundle version.
    #[error("cache inconsistency for {key}: cached under bundle {cached_version}, active bundle is {active_version}")]
    CacheInconsistency {
        /// The cache key that served the stale entry.
        key: String,
        /// The bundle version recorded on the cached entry.
        cached_version: u64,
        /// The bundle version currently active.
        active_version: u64,
    },

    /// A namespace, bundle version, rule or escalation does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A lifecycle transition was attempted that the state machine forbids.
    #[error("state transition error: {0}")]
    StateTransition(#[from] StateTransitionError),

    /// Identifier or value failed validation.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Canonicalization failure during digest computation.
    #[error("canonicalization error: {0}")]
    Canonicalization(#[from] CanonicalizationError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn format_cycle(rules: &[RuleId]) -> String {
    rules
        .iter()
        .map(RuleId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Rule input rejected by the format router.
///
/// Unsupported constructs fail closed: the router never drops logic it does
/// not understand.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// No structural heuristic matched and no default format was configured.
    #[error("unable to detect source format: {0}")]
    Undetectable(String),

    /// The payload was recognised but contains a construct with no canonical equivalent.
    #[error("unsupported construct in {format} rule: {construct}")]
    Unsupported {
        /// Source format of the payload.
        format: SourceFormat,
        /// Description of the construct.
        construct: String,
    },

    /// The payload does not have the shape its format requires.
    #[error("malformed {format} payload: {message}")]
    Malformed {
        /// Source format of the payload.
        format: SourceFormat,
        /// What was wrong with it.
        message: String,
    },

    /// The canonical output (or a pass-through rule) failed syntax validation.
    #[error("canonical syntax error: {0}")]
    Syntax(#[from] SyntaxError),

    /// A payload normalized as a single rule produced zero or several rules.
    #[error("expected exactly one rule in payload, found {0}")]
    RuleCount(usize),
}

/// A recomputed digest disagrees with the recorded one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("integrity violation in {subject}: expected {expected}, found {actual}")]
pub struct IntegrityError {
    /// What was being verified (e.g. `bundle policy/v3`, `rule r-17`).
    pub subject: String,
    /// The digest recorded in the manifest.
    pub expected: String,
    /// The digest recomputed from content.
    pub actual: String,
}

/// Errors during canonical serialization.
#[derive(Error, Debug)]
pub enum CanonicalizationError {
    /// Float values are not permitted in canonical representations.
    #[error("float values are not permitted in canonical representations: {0}")]
    FloatRejected(f64),

    /// JSON serialization failed during canonicalization.
    #[error("serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),
}

/// Errors during lifecycle transitions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateTransitionError {
    /// The attempted transition is not valid from the current state.
    #[error("invalid transition for {subject} from {from} to {to}")]
    InvalidTransition {
        /// What was transitioning (rule id, bundle version).
        subject: String,
        /// The current state name.
        from: String,
        /// The attempted target state name.
        to: String,
    },
}

/// Validation errors for identifier newtypes and configuration values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Rule identifier is empty, too long, or contains forbidden characters.
    #[error("invalid rule id \"{0}\" (expected 1-128 characters from [A-Za-z0-9_.:-])")]
    InvalidRuleId(String),

    /// Namespace is not a valid package segment.
    #[error("invalid namespace \"{0}\" (expected [a-z][a-z0-9_]*, at most 64 characters)")]
    InvalidNamespace(String),

    /// A configuration value is out of its permitted range.
    #[error("invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        /// Configuration key.
        field: String,
        /// Why it was rejected.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_display_lists_every_rule_in_order() {
        let err = CgovError::Cycle {
            rules: vec![
                RuleId::new("a").unwrap(),
                RuleId::new("b").unwrap(),
                RuleId::new("c").unwrap(),
                RuleId::new("a").unwrap(),
            ],
        };
        assert_eq!(err.to_string(), "dependency cycle detected: a -> b -> c -> a");
    }

    #[test]
    fn conflict_blocking_display_counts_conflicts() {
        let err = CgovError::ConflictBlocking {
            conflict_ids: vec!["c1".into(), "c2".into()],
            description: "contractor allow/deny".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("2 unresolved conflict(s)"));
        assert!(msg.contains("contractor allow/deny"));
    }

    #[test]
    fn runtime_unavailable_display() {
        let err = CgovError::RuntimeUnavailable {
            operation: "query".into(),
            attempts: 2,
            reason: "connection refused".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("query"));
        assert!(msg.contains("2 attempt(s)"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn cache_inconsistency_display_names_both_versions() {
        let err = CgovError::CacheInconsistency {
            key: "decision:abc".into(),
            cached_version: 3,
            active_version: 4,
        };
        let msg = err.to_string();
        assert!(msg.contains("bundle 3"));
        assert!(msg.contains("active bundle is 4"));
    }

    #[test]
    fn integrity_error_converts_into_top_level() {
        let err: CgovError = IntegrityError {
            subject: "bundle ops/v2".into(),
            expected: "sha256:aa".into(),
            actual: "sha256:bb".into(),
        }
        .into();
        assert!(matches!(err, CgovError::Integrity(_)));
        assert!(err.to_string().contains("bundle ops/v2"));
    }

    #[test]
    fn format_error_unsupported_names_construct() {
        let err = FormatError::Unsupported {
            format: SourceFormat::AccessPolicy,
            construct: "NotPrincipal".into(),
        };
        assert!(err.to_string().contains("NotPrincipal"));
        assert!(err.to_string().contains("access_policy"));
    }

    #[test]
    fn validation_error_invalid_rule_id() {
        let err = ValidationError::InvalidRuleId("bad id".into());
        assert!(err.to_string().contains("bad id"));
    }
}
