//! # API Error Types
//!
//! Maps engine errors to HTTP status codes and a uniform JSON body:
//!
//! ```json
//! { "error": { "code": "CONFLICT_BLOCKING", "message": "...", "details": { ... } } }
//! ```
//!
//! | Error | Status |
//! |---|---|
//! | format, validation, malformed body | 422 |
//! | blocking conflict, dependency cycle, invalid state transition | 409 |
//! | runtime unavailable | 503 |
//! | unknown namespace, version or escalation | 404 |
//! | integrity failure, internal | 500 |
//!
//! 500-class messages are logged, never returned.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use cgov_core::CgovError;
use cgov_engine::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Structured JSON error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// The error.
    pub error: ErrorDetail,
}

/// Inner error detail.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable code, e.g. `FORMAT_ERROR`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Offending rule or conflict identifiers, for client errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Application error rendered as an HTTP response.
#[derive(Error, Debug)]
pub enum AppError {
    /// Unknown resource (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid value in an otherwise well-formed request (422).
    #[error("validation error: {0}")]
    Validation(String),

    /// Body could not be deserialized (422).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A submitted rule was rejected by the format router (422).
    #[error("{message}")]
    Format {
        /// Router message.
        message: String,
        /// Submitted rule identifier, when known.
        rule: Option<String>,
    },

    /// Unresolved blocking conflicts prevent activation (409).
    #[error("{message}")]
    ConflictBlocking {
        /// Summary.
        message: String,
        /// Blocking conflict identifiers.
        conflict_ids: Vec<String>,
    },

    /// The rule set contains a dependency cycle (409).
    #[error("{message}")]
    Cycle {
        /// Summary.
        message: String,
        /// Rules on the cycle, in order.
        rules: Vec<String>,
    },

    /// The request conflicts with current state (409).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The policy runtime is unreachable (503).
    #[error("runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// A bundle failed verification (500).
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Anything else (500).
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            Self::BadRequest(_) => (StatusCode::UNPROCESSABLE_ENTITY, "BAD_REQUEST"),
            Self::Format { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "FORMAT_ERROR"),
            Self::ConflictBlocking { .. } => (StatusCode::CONFLICT, "CONFLICT_BLOCKING"),
            Self::Cycle { .. } => (StatusCode::CONFLICT, "DEPENDENCY_CYCLE"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Self::RuntimeUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "RUNTIME_UNAVAILABLE"),
            Self::Integrity(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTEGRITY_ERROR"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            Self::Format { rule: Some(rule), .. } => Some(json!({ "rule": rule })),
            Self::ConflictBlocking { conflict_ids, .. } => Some(json!({ "conflict_ids": conflict_ids })),
            Self::Cycle { rules, .. } => Some(json!({ "rules": rules })),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            Self::Internal(_) => "An internal error occurred".to_string(),
            Self::Integrity(_) => "Bundle integrity verification failed".to_string(),
            other => other.to_string(),
        };

        match &self {
            Self::Internal(_) | Self::Integrity(_) => tracing::error!(error = %self, "internal server error"),
            Self::RuntimeUnavailable(_) => tracing::warn!(error = %self, "policy runtime unavailable"),
            _ => {}
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
                details: self.details(),
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<CgovError> for AppError {
    fn from(err: CgovError) -> Self {
        let message = err.to_string();
        match err {
            CgovError::Format(e) => Self::Format {
                message: e.to_string(),
                rule: None,
            },
            CgovError::Integrity(_) => Self::Integrity(message),
            CgovError::Cycle { rules } => Self::Cycle {
                rules: rules.iter().map(|r| r.to_string()).collect(),
                message,
            },
            CgovError::ConflictBlocking { conflict_ids, .. } => Self::ConflictBlocking { conflict_ids, message },
            CgovError::RuntimeUnavailable { .. } => Self::RuntimeUnavailable(message),
            CgovError::NotFound(what) => Self::NotFound(what),
            CgovError::StateTransition(_) => Self::Conflict(message),
            CgovError::Validation(e) => Self::Validation(e.to_string()),
            CgovError::Canonicalization(e) => Self::Validation(e.to_string()),
            CgovError::CacheInconsistency { .. } | CgovError::Io(_) | CgovError::Json(_) => Self::Internal(message),
        }
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Format { rule, source } => Self::Format {
                message: format!("rule {rule}: {source}"),
                rule: Some(rule),
            },
            other => CgovError::from(other).into(),
        }
    }
}

impl From<cgov_core::ValidationError> for AppError {
    fn from(err: cgov_core::ValidationError) -> Self {
        Self::Validation(err.to_string())
    }
}
