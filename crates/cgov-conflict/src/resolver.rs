//! Resolution strategies, applied in order of preference.
//!
//! 1. Reviewer decisions already on file for the same conflict id.
//! 2. A deterministic patch, when auto-resolution is enabled.
//! 3. Escalation, for blocking conflicts with no patch.
//! 4. Acceptance, for everything else.

use std::collections::BTreeMap;
use std::sync::Arc;

use cgov_core::{Namespace, Rule, RuleId};
use serde::Serialize;

use crate::config::ConflictConfig;
use crate::conflict::{Conflict, ConflictId, ConflictStatus, ResolutionAction, SYSTEM_ACTOR};
use crate::error::ConflictError;
use crate::escalation::{EscalationQueue, EscalationRecord};
use crate::patch::Patch;

/// What happened to one conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// A deterministic patch was chosen.
    Patch(Patch),
    /// The conflict was filed for review.
    Escalated(EscalationRecord),
    /// The conflict was accepted as-is.
    Accepted,
    /// An earlier decision already covers it.
    Settled(ConflictStatus),
}

/// Summary of [`ConflictResolver::resolve_all`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolutionReport {
    /// Patches applied to the rule set.
    pub patches: Vec<Patch>,
    /// Escalations filed or still open.
    pub escalations: Vec<EscalationRecord>,
    /// Conflicts accepted without change.
    pub accepted: usize,
    /// Conflicts that still prevent activation.
    pub blocking: Vec<ConflictId>,
}

impl ResolutionReport {
    /// Whether any patch changed the rule set.
    pub fn changed_rules(&self) -> bool {
        !self.patches.is_empty()
    }
}

/// Applies resolution strategies and feeds the escalation queue.
#[derive(Debug, Clone)]
pub struct ConflictResolver {
    config: ConflictConfig,
    queue: Arc<EscalationQueue>,
}

impl ConflictResolver {
    /// A resolver filing escalations into `queue`.
    pub fn new(config: ConflictConfig, queue: Arc<EscalationQueue>) -> Self {
        Self { config, queue }
    }

    /// The escalation queue.
    pub fn queue(&self) -> &Arc<EscalationQueue> {
        &self.queue
    }

    /// Decide one open conflict and record the decision in its history.
    pub fn resolve(&self, namespace: &Namespace, conflict: &mut Conflict) -> Resolution {
        if conflict.status != ConflictStatus::Open {
            return Resolution::Settled(conflict.status);
        }
        if self.config.auto_resolve {
            if let Some(patch) = conflict.patch.clone() {
                conflict.record(ResolutionAction::Patched { patch: patch.clone() }, SYSTEM_ACTOR);
                return Resolution::Patch(patch);
            }
        }
        if conflict.is_blocking() {
            let record = self.queue.open(namespace, conflict);
            conflict.record(ResolutionAction::Escalated { escalation: record.id }, SYSTEM_ACTOR);
            return Resolution::Escalated(record);
        }
        conflict.record(ResolutionAction::Accepted, SYSTEM_ACTOR);
        Resolution::Accepted
    }

    /// Resolve every conflict, applying chosen patches to `rules`. The rule
    /// set must be re-checked when [`ResolutionReport::changed_rules`] holds.
    pub fn resolve_all(
        &self,
        namespace: &Namespace,
        conflicts: &mut [Conflict],
        rules: &mut BTreeMap<RuleId, Rule>,
    ) -> Result<ResolutionReport, ConflictError> {
        self.queue.apply_decisions(namespace, conflicts);
        let mut report = ResolutionReport::default();
        for conflict in conflicts.iter_mut() {
            if conflict.status == ConflictStatus::Open && self.config.auto_resolve {
                if let Some(patch) = &conflict.patch {
                    // An earlier patch may already have removed the rule.
                    match patch.apply(rules) {
                        Ok(_) => {}
                        Err(ConflictError::PatchTarget(missing)) => {
                            tracing::debug!(conflict = %conflict.id, rule = %missing, "patch target gone; skipping");
                            continue;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
            match self.resolve(namespace, conflict) {
                Resolution::Patch(patch) => report.patches.push(patch),
                Resolution::Escalated(record) => report.escalations.push(record),
                Resolution::Accepted => report.accepted += 1,
                Resolution::Settled(ConflictStatus::Escalated) => {
                    if let Some(ResolutionAction::Escalated { escalation }) =
                        conflict.history.last().map(|h| &h.action)
                    {
                        if let Some(record) = self.queue.get(*escalation) {
                            report.escalations.push(record);
                        }
                    }
                }
                Resolution::Settled(_) => {}
            }
            if conflict.is_blocking() {
                report.blocking.push(conflict.id.clone());
            }
        }
        tracing::info!(
            namespace = %namespace,
            patched = report.patches.len(),
            escalated = report.escalations.len(),
            accepted = report.accepted,
            blocking = report.blocking.len(),
            "conflicts resolved"
        );
        Ok(report)
    }
}
