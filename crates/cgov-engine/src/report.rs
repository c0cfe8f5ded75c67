//! Pipeline inputs and outputs.

use cgov_compiler::CompileMode;
use cgov_conflict::{Conflict, EscalationRecord, ResolutionReport};
use cgov_core::{BundleStatus, BundleVersion, ContentDigest, Namespace, RuleId, SourceFormat};
use cgov_router::RulePayload;
use serde::{Deserialize, Serialize};

/// One rule to add or replace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSubmission {
    /// Rule identifier.
    pub id: RuleId,
    /// Declared format; detected when absent.
    #[serde(default)]
    pub format: Option<SourceFormat>,
    /// Rule content.
    pub payload: RulePayload,
    /// Priority; overrides a priority declared inside the payload.
    #[serde(default)]
    pub priority: Option<u32>,
    /// Category; overrides a category declared inside the payload.
    #[serde(default)]
    pub category: Option<String>,
}

impl RuleSubmission {
    /// A submission with detected format and payload-declared metadata.
    pub fn new(id: RuleId, payload: impl Into<RulePayload>) -> Self {
        Self {
            id,
            format: None,
            payload: payload.into(),
            priority: None,
            category: None,
        }
    }

    /// Set the priority.
    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Set the category.
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Declare the format.
    pub fn format(mut self, format: SourceFormat) -> Self {
        self.format = Some(format);
        self
    }
}

/// A compilation trigger: rules added or changed, rules removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompileBatch {
    /// Added or changed rules.
    #[serde(default)]
    pub upserts: Vec<RuleSubmission>,
    /// Removed rule identifiers.
    #[serde(default)]
    pub removals: Vec<RuleId>,
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct CompileReport {
    /// Namespace.
    pub namespace: Namespace,
    /// Aggregate digest of the compiled manifest.
    pub manifest_digest: ContentDigest,
    /// Bundle version produced or reused.
    pub bundle_version: BundleVersion,
    /// Bundle status after gating.
    pub status: BundleStatus,
    /// Full or partial rebuild.
    pub mode: CompileMode,
    /// Rules whose fragments were rendered.
    pub affected: Vec<RuleId>,
    /// Nothing changed; the previous bundle was kept.
    pub reused: bool,
    /// Every conflict seen, most severe first.
    pub conflicts: Vec<Conflict>,
    /// What the resolver did.
    pub resolution: ResolutionReport,
    /// Why the bundle is not active, when it is not.
    pub error: Option<String>,
}

impl CompileReport {
    /// Whether the bundle is serving.
    pub fn is_active(&self) -> bool {
        self.status == BundleStatus::Active
    }
}

/// A bundle made active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Activation {
    /// Namespace.
    pub namespace: Namespace,
    /// Now active.
    pub version: BundleVersion,
    /// Active before, if any.
    pub previous: Option<BundleVersion>,
    /// Decision entries dropped from the cache.
    pub invalidated: usize,
}

/// A reviewer decision and the pipeline run it triggered.
#[derive(Debug, Clone, Serialize)]
pub struct EscalationOutcome {
    /// The closed escalation.
    pub escalation: EscalationRecord,
    /// The re-gated namespace.
    pub compile: CompileReport,
}
