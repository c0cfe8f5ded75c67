//! Conflict records.

use std::fmt;

use chrono::{DateTime, Utc};
use cgov_core::{sha256_raw, Rule, RuleId};
use serde::{Deserialize, Serialize};

use crate::escalation::EscalationId;
use crate::patch::Patch;

/// Severity of a conflict. Ordered: `Informational < Warning < Blocking`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSeverity {
    /// Reported only.
    Informational,
    /// Reported; resolved automatically where a deterministic patch exists.
    Warning,
    /// Prevents activation until resolved, dismissed or downgraded.
    Blocking,
}

impl ConflictSeverity {
    /// Lowercase name, used as a metrics label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Informational => "informational",
            Self::Warning => "warning",
            Self::Blocking => "blocking",
        }
    }
}

impl fmt::Display for ConflictSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConflictKind {
    /// Opposite conclusions with overlapping guards.
    Contradiction,
    /// Same conclusion with overlapping, non-identical guards.
    ScopeOverlap {
        /// The more specific rule, when one guard strictly contains the other.
        subsumed: Option<RuleId>,
    },
    /// Same conclusion, identical guards.
    Redundancy,
    /// Textually similar rules.
    NearDuplicate {
        /// Similarity score in `[0, 1]`.
        similarity: f64,
    },
}

impl ConflictKind {
    /// Short name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contradiction => "contradiction",
            Self::ScopeOverlap { .. } => "scope_overlap",
            Self::Redundancy => "redundancy",
            Self::NearDuplicate { .. } => "near_duplicate",
        }
    }
}

/// Deterministic conflict identifier: derived from the kind and the content
/// hashes of the rules involved, so re-detecting the same conflict on an
/// unchanged rule set yields the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConflictId(String);

impl ConflictId {
    /// Id for a conflict of `kind` between `rules`.
    pub fn derive(kind: &ConflictKind, rules: &[&Rule]) -> Self {
        let mut parts: Vec<String> = rules
            .iter()
            .map(|r| format!("{}={}", r.id, r.content_hash))
            .collect();
        parts.sort();
        let digest = sha256_raw(format!("{}|{}", kind.as_str(), parts.join("|")).as_bytes());
        Self(format!("cf-{}", &digest.to_hex()[..16]))
    }

    /// The id text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ConflictId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Resolution state of a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    /// Detected, nothing done yet.
    Open,
    /// A patch was applied to the staged rule set.
    Patched,
    /// Waiting in the escalation queue.
    Escalated,
    /// Dismissed by a reviewer.
    Dismissed,
    /// Severity lowered by a reviewer.
    Downgraded,
    /// Non-blocking and left as is.
    Accepted,
}

/// One step in a conflict's audit history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ResolutionAction {
    /// A patch was applied.
    Patched {
        /// The patch.
        patch: Patch,
    },
    /// The conflict was escalated.
    Escalated {
        /// Escalation record.
        escalation: EscalationId,
    },
    /// The conflict was dismissed.
    Dismissed {
        /// Reviewer's reason.
        reason: String,
    },
    /// Severity was lowered.
    Downgraded {
        /// Previous severity.
        from: ConflictSeverity,
        /// New severity.
        to: ConflictSeverity,
    },
    /// A non-blocking conflict was accepted without changes.
    Accepted,
}

/// Audit entry: what was done, by whom, when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionRecord {
    /// The action.
    #[serde(flatten)]
    pub action: ResolutionAction,
    /// `system` for automatic resolutions, the reviewer otherwise.
    pub actor: String,
    /// When.
    pub at: DateTime<Utc>,
}

/// Actor recorded for automatic resolutions.
pub const SYSTEM_ACTOR: &str = "system";

/// A detected conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// Deterministic id.
    pub id: ConflictId,
    /// Classification.
    #[serde(flatten)]
    pub kind: ConflictKind,
    /// Rules involved, sorted.
    pub rules: Vec<RuleId>,
    /// Severity.
    pub severity: ConflictSeverity,
    /// Human-readable summary.
    pub description: String,
    /// Deterministic patch, when one exists.
    pub patch: Option<Patch>,
    /// Resolution state.
    pub status: ConflictStatus,
    /// Audit history, oldest first.
    pub history: Vec<ResolutionRecord>,
}

impl Conflict {
    /// A new open conflict between `rules`.
    pub fn new(kind: ConflictKind, rules: &[&Rule], severity: ConflictSeverity, description: String) -> Self {
        let mut ids: Vec<RuleId> = rules.iter().map(|r| r.id.clone()).collect();
        ids.sort();
        Self {
            id: ConflictId::derive(&kind, rules),
            kind,
            rules: ids,
            severity,
            description,
            patch: None,
            status: ConflictStatus::Open,
            history: Vec::new(),
        }
    }

    /// Whether this conflict prevents activation.
    pub fn is_blocking(&self) -> bool {
        self.severity == ConflictSeverity::Blocking
            && matches!(self.status, ConflictStatus::Open | ConflictStatus::Escalated)
    }

    /// Append an audit entry and move to the matching status.
    pub fn record(&mut self, action: ResolutionAction, actor: impl Into<String>) {
        self.status = match &action {
            ResolutionAction::Patched { .. } => ConflictStatus::Patched,
            ResolutionAction::Escalated { .. } => ConflictStatus::Escalated,
            ResolutionAction::Dismissed { .. } => ConflictStatus::Dismissed,
            ResolutionAction::Downgraded { to, .. } => {
                self.severity = *to;
                ConflictStatus::Downgraded
            }
            ResolutionAction::Accepted => ConflictStatus::Accepted,
        };
        self.history.push(ResolutionRecord {
            action,
            actor: actor.into(),
            at: Utc::now(),
        });
    }
}
