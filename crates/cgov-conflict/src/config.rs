//! Conflict detection settings.

use cgov_core::ValidationError;
use serde::{Deserialize, Serialize};

/// Conflict detector and resolver settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictConfig {
    /// Apply deterministic patches to the staged rule set before compiling.
    pub auto_resolve: bool,
    /// Run the near-duplicate check.
    pub similarity_enabled: bool,
    /// Minimum similarity reported as a near-duplicate.
    pub similarity_threshold: f64,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            auto_resolve: true,
            similarity_enabled: true,
            similarity_threshold: 0.85,
        }
    }
}

impl ConflictConfig {
    /// Check ranges.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(self.similarity_threshold > 0.0 && self.similarity_threshold <= 1.0) {
            return Err(ValidationError::InvalidConfig {
                field: "conflict.similarity_threshold".into(),
                reason: "must be in (0, 1]".into(),
            });
        }
        Ok(())
    }
}
