//! Enforcement configuration. Thresholds are deployment settings.

use std::collections::BTreeMap;

use cgov_core::ValidationError;
use serde::{Deserialize, Serialize};

use crate::strategy::StrategyKind;

/// Adaptive strategy thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// Samples kept in the rolling window.
    pub window_size: usize,
    /// Samples required before the selector leaves its current state.
    pub min_samples: usize,
    /// p95 latency above which latency-optimized evaluation is preferred, ms.
    pub p95_target_ms: f64,
    /// Leave latency-optimized only once p95 drops below
    /// `p95_target_ms * recovery_factor`.
    pub recovery_factor: f64,
    /// Share of high-priority requests that selects priority weighting.
    pub high_priority_share: f64,
    /// Rules at or above this priority count as high-priority.
    pub high_priority_threshold: u32,
    /// Request categories that always count as high-priority.
    pub high_priority_categories: Vec<String>,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            window_size: 200,
            min_samples: 20,
            p95_target_ms: 50.0,
            recovery_factor: 0.8,
            high_priority_share: 0.5,
            high_priority_threshold: 10,
            high_priority_categories: Vec::new(),
        }
    }
}

/// Enforcement optimizer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnforcementConfig {
    /// Strategy used when a request does not name one.
    pub default_strategy: StrategyKind,
    /// Adaptive selector thresholds.
    pub adaptive: AdaptiveConfig,
    /// Runtime timeout for latency-optimized queries, ms.
    pub latency_timeout_ms: u64,
    /// Deadline applied when the caller gives none, ms.
    pub default_deadline_ms: u64,
    /// Whether runtime decisions are cached.
    pub cache_decisions: bool,
    /// Context goals derived before each query: name to goal text.
    pub context_goals: BTreeMap<String, String>,
    /// Goal names still derived under latency-optimized evaluation.
    pub essential_goals: Vec<String>,
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self {
            default_strategy: StrategyKind::Adaptive,
            adaptive: AdaptiveConfig::default(),
            latency_timeout_ms: 250,
            default_deadline_ms: 1_000,
            cache_decisions: true,
            context_goals: BTreeMap::new(),
            essential_goals: Vec::new(),
        }
    }
}

impl EnforcementConfig {
    /// Reject inconsistent thresholds.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |field: &str, reason: &str| ValidationError::InvalidConfig {
            field: format!("enforcement.{field}"),
            reason: reason.to_string(),
        };
        let a = &self.adaptive;
        if a.window_size == 0 || a.min_samples > a.window_size {
            return Err(invalid("adaptive.min_samples", "must not exceed a non-zero window_size"));
        }
        if !(a.p95_target_ms > 0.0) {
            return Err(invalid("adaptive.p95_target_ms", "must be positive"));
        }
        if !(a.recovery_factor > 0.0 && a.recovery_factor <= 1.0) {
            return Err(invalid("adaptive.recovery_factor", "must be in (0, 1]"));
        }
        if !(0.0..=1.0).contains(&a.high_priority_share) {
            return Err(invalid("adaptive.high_priority_share", "must be in [0, 1]"));
        }
        if self.latency_timeout_ms == 0 || self.default_deadline_ms == 0 {
            return Err(invalid("latency_timeout_ms", "timeouts must be positive"));
        }
        if let Some(missing) = self.essential_goals.iter().find(|g| !self.context_goals.contains_key(*g)) {
            return Err(invalid("essential_goals", &format!("'{missing}' is not a context goal")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let c = EnforcementConfig::default();
        c.validate().unwrap();
        assert_eq!(c.adaptive.window_size, 200);
        assert_eq!(c.adaptive.min_samples, 20);
    }

    #[test]
    fn essential_goals_must_exist() {
        let c = EnforcementConfig {
            essential_goals: vec!["night".into()],
            ..EnforcementConfig::default()
        };
        assert!(c.validate().unwrap_err().to_string().contains("night"));
    }

    #[test]
    fn recovery_factor_bounds() {
        let mut c = EnforcementConfig::default();
        c.adaptive.recovery_factor = 1.5;
        assert!(c.validate().is_err());
    }
}
