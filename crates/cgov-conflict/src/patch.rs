//! Patches applied to a staged rule set.

use std::collections::BTreeMap;
use std::fmt;

use cgov_core::{Rule, RuleId};
use serde::{Deserialize, Serialize};

use crate::error::ConflictError;

/// A change to the staged rule set that resolves a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Patch {
    /// `rule` yields to `winner`: it no longer fires when `winner`'s guard holds.
    AddOverride {
        /// The losing rule.
        rule: RuleId,
        /// The winning rule.
        winner: RuleId,
    },
    /// Remove `rule`; `kept` covers its scope.
    RetireRule {
        /// The rule to retire.
        rule: RuleId,
        /// The rule that remains.
        kept: RuleId,
    },
}

impl Patch {
    /// The rule the patch changes.
    pub fn target(&self) -> &RuleId {
        match self {
            Self::AddOverride { rule, .. } | Self::RetireRule { rule, .. } => rule,
        }
    }

    /// Apply to `rules`. An override already present is a no-op; an
    /// overridden rule gets a new version. Returns whether anything changed.
    pub fn apply(&self, rules: &mut BTreeMap<RuleId, Rule>) -> Result<bool, ConflictError> {
        match self {
            Self::AddOverride { rule, winner } => {
                let current = rules.get(rule).ok_or_else(|| ConflictError::PatchTarget(rule.clone()))?;
                if !rules.contains_key(winner) {
                    return Err(ConflictError::PatchTarget(winner.clone()));
                }
                if current.overrides.contains(winner) {
                    return Ok(false);
                }
                let patched = current.next_version().overrides(winner.clone()).build()?;
                rules.insert(rule.clone(), patched);
                Ok(true)
            }
            Self::RetireRule { rule, kept } => {
                if !rules.contains_key(kept) {
                    return Err(ConflictError::PatchTarget(kept.clone()));
                }
                rules
                    .remove(rule)
                    .map(|_| true)
                    .ok_or_else(|| ConflictError::PatchTarget(rule.clone()))
            }
        }
    }
}

impl fmt::Display for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddOverride { rule, winner } => write!(f, "{rule} yields to {winner}"),
            Self::RetireRule { rule, kept } => write!(f, "retire {rule} in favour of {kept}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgov_core::lang::parse_rule;
    use cgov_core::SourceFormat;

    fn id(s: &str) -> RuleId {
        RuleId::new(s).unwrap()
    }

    fn set() -> BTreeMap<RuleId, Rule> {
        ["a", "b"]
            .into_iter()
            .map(|n| {
                let r = Rule::builder(id(n), SourceFormat::Canonical, parse_rule("deny {\n    input.x\n}").unwrap())
                    .build()
                    .unwrap();
                (r.id.clone(), r)
            })
            .collect()
    }

    #[test]
    fn add_override_bumps_version_once() {
        let mut rules = set();
        let p = Patch::AddOverride { rule: id("a"), winner: id("b") };
        assert!(p.apply(&mut rules).unwrap());
        let a = &rules[&id("a")];
        assert_eq!(a.overrides, vec![id("b")]);
        assert_eq!(a.version, 2);
        assert!(!p.apply(&mut rules).unwrap());
    }

    #[test]
    fn retire_removes_rule() {
        let mut rules = set();
        let p = Patch::RetireRule { rule: id("a"), kept: id("b") };
        assert!(p.apply(&mut rules).unwrap());
        assert!(!rules.contains_key(&id("a")));
        assert!(matches!(p.apply(&mut rules), Err(ConflictError::PatchTarget(_))));
    }
}
