//! Runtime client errors.

use cgov_core::{CgovError, ValidationError};
use thiserror::Error;

/// Errors talking to the policy runtime.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// Connection-level failure.
    #[error("{operation}: transport error: {reason}")]
    Transport {
        /// Runtime operation.
        operation: String,
        /// Underlying error text.
        reason: String,
    },

    /// The call did not finish within its deadline.
    #[error("{operation}: timed out after {after_ms} ms")]
    Timeout {
        /// Runtime operation.
        operation: String,
        /// Deadline that passed.
        after_ms: u64,
    },

    /// The runtime answered with a non-success status.
    #[error("{operation}: runtime returned HTTP {status}: {body}")]
    Status {
        /// Runtime operation.
        operation: String,
        /// HTTP status code.
        status: u16,
        /// Response body excerpt.
        body: String,
    },

    /// The response could not be interpreted.
    #[error("{operation}: unexpected response: {reason}")]
    Decode {
        /// Runtime operation.
        operation: String,
        /// What was wrong.
        reason: String,
    },

    /// Retries are exhausted.
    #[error("{operation}: runtime unavailable after {attempts} attempt(s): {reason}")]
    Unavailable {
        /// Runtime operation.
        operation: String,
        /// Attempts made.
        attempts: u32,
        /// Last failure.
        reason: String,
    },

    /// Client construction failed.
    #[error("runtime client configuration: {0}")]
    Config(String),
}

impl RuntimeError {
    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::Timeout { .. } => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Operation the error occurred in.
    pub fn operation(&self) -> &str {
        match self {
            Self::Transport { operation, .. }
            | Self::Timeout { operation, .. }
            | Self::Status { operation, .. }
            | Self::Decode { operation, .. }
            | Self::Unavailable { operation, .. } => operation,
            Self::Config(_) => "configure",
        }
    }
}

impl From<RuntimeError> for CgovError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Unavailable {
                operation,
                attempts,
                reason,
            } => CgovError::RuntimeUnavailable {
                operation,
                attempts,
                reason,
            },
            RuntimeError::Config(reason) => CgovError::Validation(ValidationError::InvalidConfig {
                field: "runtime".into(),
                reason,
            }),
            other => CgovError::RuntimeUnavailable {
                operation: other.operation().to_string(),
                attempts: 1,
                reason: other.to_string(),
            },
        }
    }
}
