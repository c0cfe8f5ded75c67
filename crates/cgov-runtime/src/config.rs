//! Runtime client configuration.

use std::fmt;

use cgov_core::ValidationError;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::retry::RetryPolicy;

/// Where and how to reach the policy runtime.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Base URL of the runtime.
    pub base_url: String,
    /// Per-request timeout, milliseconds.
    pub request_timeout_ms: u64,
    /// Retry and failure policy.
    pub retry: RetryPolicy,
    /// Bearer token. Never read from or written to configuration files.
    #[serde(skip)]
    pub token: Option<Zeroizing<String>>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8181".into(),
            request_timeout_ms: 2_000,
            retry: RetryPolicy::default(),
            token: None,
        }
    }
}

impl fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("base_url", &self.base_url)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("retry", &self.retry)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl RuntimeConfig {
    /// Set the bearer token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(Zeroizing::new(token.into()));
        self
    }

    /// Reject unusable values.
    pub fn validate(&self) -> Result<(), ValidationError> {
        url::Url::parse(&self.base_url).map_err(|e| ValidationError::InvalidConfig {
            field: "runtime.base_url".into(),
            reason: e.to_string(),
        })?;
        if self.request_timeout_ms == 0 {
            return Err(ValidationError::InvalidConfig {
                field: "runtime.request_timeout_ms".into(),
                reason: "must be positive".into(),
            });
        }
        self.retry.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_token() {
        let c = RuntimeConfig::default().with_token("s3cr3t");
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("s3cr3t"));
        assert!(dbg.contains("REDACTED"));
    }

    #[test]
    fn token_is_not_serialized() {
        let c = RuntimeConfig::default().with_token("s3cr3t");
        let json = serde_json::to_string(&c).unwrap();
        assert!(!json.contains("s3cr3t"));
    }

    #[test]
    fn validates_url() {
        let c = RuntimeConfig {
            base_url: "not a url".into(),
            ..RuntimeConfig::default()
        };
        assert!(c.validate().is_err());
        RuntimeConfig::default().validate().unwrap();
    }
}
