//! # Rule Registry
//!
//! Every version of every rule, per namespace. An update never edits a rule
//! in place: it appends version `n + 1` as a new candidate. Re-submitting
//! content whose hash matches the current version is a no-op, which keeps
//! manifests and compiled fragments stable across identical submissions.
//!
//! ## Lifecycle
//!
//! - `upsert` appends a `Candidate`.
//! - `activate` promotes the working set to `Active` and retires the
//!   versions it replaces.
//! - `remove` retires the current version.
//! - `reinstate` makes an older rule set current again (rollback), appending
//!   new versions where content differs from the latest one.

use std::collections::{BTreeMap, BTreeSet};

use cgov_core::{Rule, RuleId, RuleStatus};

use crate::error::ManifestError;

/// Result of [`RuleRegistry::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First version of a new identifier.
    Added,
    /// A new version was appended.
    Modified {
        /// The appended version number.
        version: u32,
    },
    /// Content is identical to the current version.
    Unchanged,
}

/// Append-only rule history.
#[derive(Debug, Clone, Default)]
pub struct RuleRegistry {
    history: BTreeMap<RuleId, Vec<Rule>>,
}

impl RuleRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `rule` unless its content matches the current version.
    /// The version number and status of `rule` are assigned here.
    pub fn upsert(&mut self, mut rule: Rule) -> UpsertOutcome {
        let versions = self.history.entry(rule.id.clone()).or_default();
        let latest = versions.last();
        if let Some(current) = latest.filter(|r| r.status != RuleStatus::Retired) {
            if current.content_hash == rule.content_hash {
                return UpsertOutcome::Unchanged;
            }
        }
        let outcome = match latest {
            None => {
                rule.version = 1;
                UpsertOutcome::Added
            }
            Some(previous) => {
                rule.version = previous.version + 1;
                if previous.status == RuleStatus::Retired {
                    UpsertOutcome::Added
                } else {
                    UpsertOutcome::Modified {
                        version: rule.version,
                    }
                }
            }
        };
        rule.status = RuleStatus::Candidate;
        tracing::debug!(rule = %rule.id, version = rule.version, "rule version appended");
        versions.push(rule);
        outcome
    }

    /// Retire the current version of `id`. A pending candidate that replaced
    /// an active version is retired together with it.
    pub fn remove(&mut self, id: &RuleId) -> Result<(), ManifestError> {
        let versions = self
            .history
            .get_mut(id)
            .ok_or_else(|| ManifestError::RuleNotFound(id.clone()))?;
        let mut retired_any = false;
        for rule in versions.iter_mut().rev() {
            match rule.status {
                RuleStatus::Candidate | RuleStatus::Active => {
                    rule.transition(RuleStatus::Retired)?;
                    retired_any = true;
                }
                RuleStatus::Draft | RuleStatus::Retired => break,
            }
        }
        if retired_any {
            Ok(())
        } else {
            Err(ManifestError::RuleNotFound(id.clone()))
        }
    }

    /// The current (latest, non-retired) version of `id`.
    pub fn current(&self, id: &RuleId) -> Option<&Rule> {
        self.history
            .get(id)
            .and_then(|v| v.last())
            .filter(|r| r.status != RuleStatus::Retired)
    }

    /// Every version of `id`, oldest first.
    pub fn history(&self, id: &RuleId) -> &[Rule] {
        self.history.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    /// The current version of every live rule: what the next compilation sees.
    pub fn working_set(&self) -> BTreeMap<RuleId, Rule> {
        self.history
            .iter()
            .filter_map(|(id, versions)| {
                versions
                    .last()
                    .filter(|r| r.status != RuleStatus::Retired)
                    .map(|r| (id.clone(), r.clone()))
            })
            .collect()
    }

    /// Rules currently in `Active` status.
    pub fn active_ids(&self) -> BTreeSet<RuleId> {
        self.history
            .iter()
            .filter(|(_, versions)| versions.iter().any(|r| r.status == RuleStatus::Active))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Promote every current candidate to `Active`, retiring the active
    /// versions they replace.
    pub fn activate(&mut self) -> Result<usize, ManifestError> {
        let mut promoted = 0;
        for versions in self.history.values_mut() {
            let Some(last) = versions.len().checked_sub(1) else {
                continue;
            };
            if versions[last].status != RuleStatus::Candidate {
                continue;
            }
            for older in &mut versions[..last] {
                if older.status == RuleStatus::Active || older.status == RuleStatus::Candidate {
                    older.transition(RuleStatus::Retired)?;
                }
            }
            versions[last].transition(RuleStatus::Active)?;
            promoted += 1;
        }
        Ok(promoted)
    }

    /// Make `rules` the active set again. Identifiers not in `rules` are
    /// retired; content that differs from the latest version is appended.
    pub fn reinstate(&mut self, rules: impl IntoIterator<Item = Rule>) -> Result<(), ManifestError> {
        let target: BTreeMap<RuleId, Rule> = rules.into_iter().map(|r| (r.id.clone(), r)).collect();
        let stale: Vec<RuleId> = self
            .working_set()
            .into_keys()
            .filter(|id| !target.contains_key(id))
            .collect();
        for id in stale {
            self.remove(&id)?;
        }
        for rule in target.into_values() {
            let versions = self.history.entry(rule.id.clone()).or_default();
            let same = versions
                .last()
                .is_some_and(|r| r.content_hash == rule.content_hash && r.status != RuleStatus::Retired);
            if !same {
                let mut appended = rule;
                appended.version = versions.last().map_or(1, |r| r.version + 1);
                appended.status = RuleStatus::Candidate;
                versions.push(appended);
            }
        }
        self.activate()?;
        Ok(())
    }

    /// Number of identifiers ever registered.
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// True when nothing was ever registered.
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}
