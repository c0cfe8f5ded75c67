//! Requests and decisions.

use std::time::Duration;

use cgov_cache::Tier;
use cgov_core::{BundleVersion, Namespace, RuleId};
use cgov_runtime::FailureMode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::strategy::StrategyKind;

/// One request to evaluate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnforcementRequest {
    /// Rule-set namespace.
    pub namespace: Namespace,
    /// Input document passed to the runtime.
    pub input: Value,
    /// Request category, used for cache keying and priority statistics.
    #[serde(default)]
    pub category: Option<String>,
}

impl EnforcementRequest {
    /// A request without a category.
    pub fn new(namespace: Namespace, input: Value) -> Self {
        Self {
            namespace,
            input,
            category: None,
        }
    }

    /// Set the category.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// Caller context for a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnforcementContext {
    /// Selects the fail-closed branch of the failure policy.
    pub safety_critical: bool,
    /// Overall deadline. The configured default applies when absent.
    pub deadline: Option<Duration>,
    /// Who is asking, for logs.
    pub requester: Option<String>,
}

impl EnforcementContext {
    /// A safety-critical context.
    pub fn safety_critical() -> Self {
        Self {
            safety_critical: true,
            ..Self::default()
        }
    }

    /// Set the deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// The outcome of one request. Transient: reported and logged, never
/// consulted later except through the decision cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnforcementDecision {
    /// Final outcome.
    pub allow: bool,
    /// Allow rules that matched.
    pub allow_matches: Vec<RuleId>,
    /// Deny rules that matched.
    pub deny_matches: Vec<RuleId>,
    /// Served from the cache.
    pub cache_hit: bool,
    /// Tier that served the hit.
    pub cache_tier: Option<Tier>,
    /// Concrete strategy applied.
    pub strategy: StrategyKind,
    /// Bundle version the decision was made under.
    pub bundle_version: BundleVersion,
    /// End-to-end latency.
    pub latency_micros: u64,
    /// Set when the runtime failed and the failure policy decided.
    pub failure_reason: Option<String>,
    /// Failure mode applied, with `failure_reason`.
    pub failure_mode: Option<FailureMode>,
}

impl EnforcementDecision {
    /// Whether the failure policy produced this decision.
    pub fn is_failure(&self) -> bool {
        self.failure_reason.is_some()
    }

    /// `allow`, `deny`, or `fail_open` / `fail_closed`.
    pub fn outcome(&self) -> &'static str {
        match (self.failure_mode, self.allow) {
            (Some(mode), _) => mode.as_str(),
            (None, true) => "allow",
            (None, false) => "deny",
        }
    }
}
