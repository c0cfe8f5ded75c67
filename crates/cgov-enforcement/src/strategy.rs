//! Evaluation strategies.

use std::fmt;

use cgov_compiler::CompiledBundle;
use cgov_core::RuleId;
use serde::{Deserialize, Serialize};

/// How a request is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Full context derivation; the runtime's outcome as returned.
    Standard,
    /// Essential context only, tighter timeout, no cached trace.
    LatencyOptimized,
    /// Outcome recomputed from matched rules by priority.
    PriorityWeighted,
    /// One of the above, chosen from recent statistics.
    Adaptive,
}

impl StrategyKind {
    /// Every concrete strategy, for metrics labels.
    pub const CONCRETE: [StrategyKind; 3] = [Self::Standard, Self::LatencyOptimized, Self::PriorityWeighted];

    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::LatencyOptimized => "latency_optimized",
            Self::PriorityWeighted => "priority_weighted",
            Self::Adaptive => "adaptive",
        }
    }

    /// Whether only essential context goals are derived.
    pub fn essential_context_only(&self) -> bool {
        matches!(self, Self::LatencyOptimized)
    }

    /// Whether the matched-rule trace is kept in the cache.
    pub fn caches_trace(&self) -> bool {
        !matches!(self, Self::LatencyOptimized)
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome by priority weight: the highest-priority matched rule decides,
/// deny wins ties, no match denies.
pub fn priority_weighted(bundle: &CompiledBundle, allow_matches: &[RuleId], deny_matches: &[RuleId]) -> bool {
    let top = |ids: &[RuleId]| ids.iter().map(|id| bundle.priority_of(id.as_str())).max();
    match (top(allow_matches), top(deny_matches)) {
        (Some(a), Some(d)) => a > d,
        (Some(_), None) => true,
        _ => false,
    }
}
