//! Evaluator limits.

use cgov_core::ValidationError;
use serde::{Deserialize, Serialize};

/// Bounds on a single saturation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactsConfig {
    /// Stop with [`crate::FactError::LimitExceeded`] past this many facts.
    pub max_facts: usize,
    /// Fixpoint rounds allowed per stratum.
    pub max_rounds: usize,
}

impl Default for FactsConfig {
    fn default() -> Self {
        Self {
            max_facts: 100_000,
            max_rounds: 1_000,
        }
    }
}

impl FactsConfig {
    /// Reject zero limits.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_facts == 0 || self.max_rounds == 0 {
            return Err(ValidationError::InvalidConfig {
                field: "facts.max_facts".into(),
                reason: "limits must be positive".into(),
            });
        }
        Ok(())
    }
}
