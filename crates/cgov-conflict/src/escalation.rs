//! Human escalation queue.
//!
//! Conflicts the deterministic strategies cannot settle are filed here.
//! Each record follows a small lifecycle (`Open` then `Resolved` or
//! `Dismissed`), and every transition is appended to its log with the actor
//! and time. Closed records are kept: a re-detected conflict with the same
//! id picks up the reviewer's decision instead of being escalated again.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cgov_core::Namespace;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conflict::{Conflict, ConflictId, ConflictSeverity, ResolutionAction};
use crate::error::ConflictError;
use crate::patch::Patch;

/// Escalation identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EscalationId(Uuid);

impl EscalationId {
    /// A fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EscalationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EscalationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for EscalationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle state of an escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationState {
    /// Waiting for a reviewer.
    Open,
    /// A reviewer applied a patch or downgraded the conflict.
    Resolved,
    /// A reviewer dismissed the conflict.
    Dismissed,
}

impl EscalationState {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Resolved => "resolved",
            Self::Dismissed => "dismissed",
        }
    }
}

impl fmt::Display for EscalationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reviewer's decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HumanResolution {
    /// Apply a patch to the staged rule set.
    ApplyPatch {
        /// The patch.
        patch: Patch,
    },
    /// Accept the conflict as intended.
    Dismiss {
        /// Why.
        reason: String,
    },
    /// Lower the severity.
    Downgrade {
        /// New severity; must be below the current one.
        severity: ConflictSeverity,
    },
}

/// One lifecycle transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationTransition {
    /// State before.
    pub from: EscalationState,
    /// State after.
    pub to: EscalationState,
    /// Who.
    pub actor: String,
    /// When.
    pub at: DateTime<Utc>,
}

/// An escalated conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRecord {
    /// Escalation id.
    pub id: EscalationId,
    /// Namespace of the rule set.
    pub namespace: Namespace,
    /// The conflict, with its audit history.
    pub conflict: Conflict,
    /// Lifecycle state.
    pub state: EscalationState,
    /// When the escalation was filed.
    pub opened_at: DateTime<Utc>,
    /// The reviewer's decision, once closed.
    pub resolution: Option<HumanResolution>,
    /// Transitions, oldest first.
    pub transition_log: Vec<EscalationTransition>,
}

impl EscalationRecord {
    fn transition(&mut self, to: EscalationState, actor: &str) {
        self.transition_log.push(EscalationTransition {
            from: self.state,
            to,
            actor: actor.to_string(),
            at: Utc::now(),
        });
        self.state = to;
    }

    fn is_for(&self, namespace: &Namespace, conflict: &ConflictId) -> bool {
        &self.namespace == namespace && &self.conflict.id == conflict
    }

    fn closing_actor(&self) -> &str {
        self.transition_log.last().map_or("unknown", |t| t.actor.as_str())
    }
}

/// In-process escalation queue.
#[derive(Debug, Default)]
pub struct EscalationQueue {
    records: RwLock<BTreeMap<EscalationId, EscalationRecord>>,
}

impl EscalationQueue {
    /// An empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// File `conflict`, or return the open escalation already filed for it.
    pub fn open(&self, namespace: &Namespace, conflict: &Conflict) -> EscalationRecord {
        let mut records = self.records.write();
        if let Some(existing) = records
            .values()
            .find(|r| r.state == EscalationState::Open && r.is_for(namespace, &conflict.id))
        {
            return existing.clone();
        }
        let id = EscalationId::new();
        let mut conflict = conflict.clone();
        conflict.record(ResolutionAction::Escalated { escalation: id }, crate::conflict::SYSTEM_ACTOR);
        let record = EscalationRecord {
            id,
            namespace: namespace.clone(),
            conflict,
            state: EscalationState::Open,
            opened_at: Utc::now(),
            resolution: None,
            transition_log: Vec::new(),
        };
        tracing::warn!(
            escalation = %id,
            namespace = %namespace,
            conflict = %record.conflict.id,
            "conflict escalated for review"
        );
        records.insert(id, record.clone());
        record
    }

    /// One escalation.
    pub fn get(&self, id: EscalationId) -> Option<EscalationRecord> {
        self.records.read().get(&id).cloned()
    }

    /// Escalations, optionally filtered, oldest first.
    pub fn list(&self, namespace: Option<&Namespace>, state: Option<EscalationState>) -> Vec<EscalationRecord> {
        let mut out: Vec<EscalationRecord> = self
            .records
            .read()
            .values()
            .filter(|r| namespace.map_or(true, |ns| &r.namespace == ns))
            .filter(|r| state.map_or(true, |s| r.state == s))
            .cloned()
            .collect();
        out.sort_by_key(|r| r.opened_at);
        out
    }

    /// Record a reviewer's decision.
    pub fn resolve(
        &self,
        id: EscalationId,
        resolution: HumanResolution,
        actor: &str,
    ) -> Result<EscalationRecord, ConflictError> {
        let mut records = self.records.write();
        let record = records.get_mut(&id).ok_or(ConflictError::EscalationNotFound(id))?;
        if record.state != EscalationState::Open {
            return Err(ConflictError::AlreadyClosed { id, state: record.state });
        }
        let (action, to) = match &resolution {
            HumanResolution::ApplyPatch { patch } => (
                ResolutionAction::Patched { patch: patch.clone() },
                EscalationState::Resolved,
            ),
            HumanResolution::Dismiss { reason } => (
                ResolutionAction::Dismissed { reason: reason.clone() },
                EscalationState::Dismissed,
            ),
            HumanResolution::Downgrade { severity } => {
                if *severity >= record.conflict.severity {
                    return Err(ConflictError::InvalidDowngrade {
                        from: record.conflict.severity,
                        to: *severity,
                    });
                }
                (
                    ResolutionAction::Downgraded {
                        from: record.conflict.severity,
                        to: *severity,
                    },
                    EscalationState::Resolved,
                )
            }
        };
        record.conflict.record(action, actor);
        record.resolution = Some(resolution);
        record.transition(to, actor);
        tracing::info!(escalation = %id, actor, state = %to, "escalation closed");
        Ok(record.clone())
    }

    /// Carry reviewer decisions over to freshly detected conflicts: a
    /// conflict with an open escalation is marked escalated; one with a
    /// closed escalation gets the reviewer's decision again.
    pub fn apply_decisions(&self, namespace: &Namespace, conflicts: &mut [Conflict]) {
        let records = self.records.read();
        for conflict in conflicts.iter_mut() {
            let mut matching: Vec<&EscalationRecord> =
                records.values().filter(|r| r.is_for(namespace, &conflict.id)).collect();
            matching.sort_by_key(|r| r.opened_at);
            let Some(latest) = matching.last() else { continue };
            let actor = latest.closing_actor().to_string();
            match (&latest.state, &latest.resolution) {
                (EscalationState::Open, _) => conflict.record(
                    ResolutionAction::Escalated { escalation: latest.id },
                    crate::conflict::SYSTEM_ACTOR,
                ),
                (_, Some(HumanResolution::Dismiss { reason })) => {
                    conflict.record(ResolutionAction::Dismissed { reason: reason.clone() }, actor)
                }
                (_, Some(HumanResolution::Downgrade { severity })) => conflict.record(
                    ResolutionAction::Downgraded {
                        from: conflict.severity,
                        to: *severity,
                    },
                    actor,
                ),
                (_, Some(HumanResolution::ApplyPatch { patch })) => {
                    conflict.record(ResolutionAction::Patched { patch: patch.clone() }, actor)
                }
                (_, None) => {}
            }
        }
    }

    /// Number of open escalations.
    pub fn open_count(&self) -> usize {
        self.records
            .read()
            .values()
            .filter(|r| r.state == EscalationState::Open)
            .count()
    }
}
