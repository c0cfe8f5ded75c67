//! The set of rule identifiers that differ between two manifests.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::rule::RuleId;

/// Added, removed and modified rule identifiers, each sorted.
///
/// This is the sole input the compiler needs to choose between a full and a
/// partial rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Present in the new manifest only.
    pub added: BTreeSet<RuleId>,
    /// Present in the old manifest only.
    pub removed: BTreeSet<RuleId>,
    /// Present in both with different content hashes.
    pub modified: BTreeSet<RuleId>,
}

impl ChangeSet {
    /// A change set treating every id in `ids` as added (first compilation).
    pub fn all_added(ids: impl IntoIterator<Item = RuleId>) -> Self {
        Self {
            added: ids.into_iter().collect(),
            ..Self::default()
        }
    }

    /// True when nothing changed.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    /// Total number of changed identifiers.
    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.modified.len()
    }

    /// Union of all three sets.
    pub fn all(&self) -> BTreeSet<RuleId> {
        self.added
            .iter()
            .chain(&self.removed)
            .chain(&self.modified)
            .cloned()
            .collect()
    }

    /// Added and modified identifiers: the rules whose fragments must be rebuilt.
    pub fn upserted(&self) -> BTreeSet<RuleId> {
        self.added.iter().chain(&self.modified).cloned().collect()
    }
}
