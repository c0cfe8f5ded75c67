//! Compiler configuration.

use cgov_core::ValidationError;
use serde::{Deserialize, Serialize};

/// Tunables for the full/partial rebuild decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Rebuild everything when `affected / total` exceeds this fraction.
    pub full_rebuild_ratio: f64,
    /// Derive the ratio from observed compile costs instead.
    pub adaptive_threshold: bool,
    /// Lower clamp for the derived ratio.
    pub min_ratio: f64,
    /// Upper clamp for the derived ratio.
    pub max_ratio: f64,
    /// Smoothing factor for cost averages, in (0, 1].
    pub ewma_alpha: f64,
    /// Runs of each mode required before the derived ratio is used.
    pub min_samples: u32,
    /// Per-rule cost assumed before anything was measured, microseconds.
    pub initial_cost_per_rule_micros: u64,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            full_rebuild_ratio: 0.3,
            adaptive_threshold: false,
            min_ratio: 0.05,
            max_ratio: 0.9,
            ewma_alpha: 0.2,
            min_samples: 3,
            initial_cost_per_rule_micros: 20,
        }
    }
}

impl CompilerConfig {
    /// Reject out-of-range values.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |field: &str, reason: &str| ValidationError::InvalidConfig {
            field: format!("compiler.{field}"),
            reason: reason.to_string(),
        };
        if !(self.full_rebuild_ratio > 0.0 && self.full_rebuild_ratio <= 1.0) {
            return Err(invalid("full_rebuild_ratio", "must be in (0, 1]"));
        }
        if !(self.min_ratio > 0.0 && self.min_ratio <= self.max_ratio && self.max_ratio <= 1.0) {
            return Err(invalid("min_ratio", "requires 0 < min_ratio <= max_ratio <= 1"));
        }
        if !(self.ewma_alpha > 0.0 && self.ewma_alpha <= 1.0) {
            return Err(invalid("ewma_alpha", "must be in (0, 1]"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let c = CompilerConfig::default();
        assert_eq!(c.full_rebuild_ratio, 0.3);
        c.validate().unwrap();
    }

    #[test]
    fn rejects_out_of_range_ratio() {
        let c = CompilerConfig {
            full_rebuild_ratio: 1.5,
            ..CompilerConfig::default()
        };
        assert!(c.validate().unwrap_err().to_string().contains("full_rebuild_ratio"));
        let c = CompilerConfig {
            min_ratio: 0.8,
            max_ratio: 0.5,
            ..CompilerConfig::default()
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let c: CompilerConfig = serde_json::from_str(r#"{"full_rebuild_ratio": 0.5}"#).unwrap();
        assert_eq!(c.full_rebuild_ratio, 0.5);
        assert_eq!(c.min_samples, 3);
    }
}
