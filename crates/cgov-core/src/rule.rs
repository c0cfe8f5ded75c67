//! # Rule Data Model
//!
//! A [`Rule`] is a named, versioned unit of policy logic expressed in the
//! canonical language. Its content hash covers only what affects the compiled
//! output (identifier, rendered body, priority, category, overrides), never
//! timestamps or status, so identical content always hashes identically.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::canonical::CanonicalBytes;
use crate::digest::{sha256_digest, ContentDigest};
use crate::error::{CanonicalizationError, IntegrityError, StateTransitionError, ValidationError};
use crate::lang::{render_rule, CanonicalRule};

/// Validated rule identifier: 1-128 characters from `[A-Za-z0-9_.:-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RuleId(String);

impl RuleId {
    /// Validate and wrap an identifier.
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        let valid = !id.is_empty()
            && id.len() <= 128
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-'));
        if valid {
            Ok(Self(id))
        } else {
            Err(ValidationError::InvalidRuleId(id))
        }
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RuleId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RuleId> for String {
    fn from(id: RuleId) -> Self {
        id.0
    }
}

impl FromStr for RuleId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// The representation a candidate rule arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    /// Generic structured policy document (`effect` / `conditions`), JSON or YAML.
    StructuredPolicy,
    /// Generic rule list (`rules: [{when, then}]`), JSON or YAML.
    RuleList,
    /// Vendor-style access policy (`Statement` / `Effect` / `Condition`).
    AccessPolicy,
    /// Canonical language text, passed through after validation.
    Canonical,
}

impl SourceFormat {
    /// All variants in declaration order.
    pub const ALL: [SourceFormat; 4] = [
        SourceFormat::StructuredPolicy,
        SourceFormat::RuleList,
        SourceFormat::AccessPolicy,
        SourceFormat::Canonical,
    ];

    /// Stable snake_case name used in manifests, APIs and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StructuredPolicy => "structured_policy",
            Self::RuleList => "rule_list",
            Self::AccessPolicy => "access_policy",
            Self::Canonical => "canonical",
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceFormat {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| ValidationError::InvalidConfig {
                field: "source_format".into(),
                reason: format!("unknown format \"{s}\""),
            })
    }
}

/// Rule lifecycle.
///
/// ```text
/// Draft ──▶ Candidate ──▶ Active ──▶ Retired
///               └──────(rejected)──────▲
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    /// Drafted upstream, not yet submitted.
    Draft,
    /// Submitted for compilation.
    #[default]
    Candidate,
    /// Part of the active bundle. Never mutated; updates append a new version.
    Active,
    /// Superseded, removed or rejected.
    Retired,
}

impl RuleStatus {
    /// Return the string value used in API responses and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Candidate => "candidate",
            Self::Active => "active",
            Self::Retired => "retired",
        }
    }

    /// Whether the lifecycle permits moving from `self` to `to`.
    pub fn can_transition_to(&self, to: RuleStatus) -> bool {
        use RuleStatus::*;
        matches!(
            (self, to),
            (Draft, Candidate) | (Candidate, Active) | (Candidate, Retired) | (Active, Retired)
        )
    }
}

impl fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, versioned unit of policy logic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Identifier, stable across versions.
    pub id: RuleId,
    /// Version number, starting at 1.
    pub version: u32,
    /// Format the rule was submitted in.
    pub source_format: SourceFormat,
    /// Parsed canonical form.
    pub canonical: CanonicalRule,
    /// Rendered canonical text of [`Rule::canonical`].
    pub body: String,
    /// Digest over the compile-relevant content.
    pub content_hash: ContentDigest,
    /// Custom predicates this rule defines (decision rules define none).
    pub defines: BTreeSet<String>,
    /// Predicates this rule reads.
    pub consumes: BTreeSet<String>,
    /// Rules this rule yields to; each entry is also a dependency edge.
    pub overrides: Vec<RuleId>,
    /// Priority weight; higher wins.
    pub priority: u32,
    /// Free-form category (e.g. `access`), used by priority-weighted enforcement.
    pub category: Option<String>,
    /// Lifecycle status.
    pub status: RuleStatus,
    /// When this version was created.
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct HashInput<'a> {
    id: &'a str,
    body: &'a str,
    priority: u32,
    category: Option<&'a str>,
    overrides: Vec<&'a str>,
}

impl Rule {
    /// Start building a rule from its canonical form.
    pub fn builder(id: RuleId, source_format: SourceFormat, canonical: CanonicalRule) -> RuleBuilder {
        RuleBuilder {
            id,
            version: 1,
            source_format,
            canonical,
            overrides: Vec::new(),
            priority: 0,
            category: None,
            status: RuleStatus::Candidate,
            created_at: None,
        }
    }

    /// A builder pre-populated with this rule's fields and the next version number.
    pub fn next_version(&self) -> RuleBuilder {
        RuleBuilder {
            id: self.id.clone(),
            version: self.version + 1,
            source_format: self.source_format,
            canonical: self.canonical.clone(),
            overrides: self.overrides.clone(),
            priority: self.priority,
            category: self.category.clone(),
            status: RuleStatus::Candidate,
            created_at: None,
        }
    }

    /// Whether this rule concludes `allow` or `deny`.
    pub fn is_decision(&self) -> bool {
        self.canonical.is_decision()
    }

    /// Recompute the content hash and compare it with the recorded one.
    pub fn verify_hash(&self) -> Result<(), IntegrityError> {
        let actual = content_hash(
            &self.id,
            &self.body,
            self.priority,
            self.category.as_deref(),
            &self.overrides,
        )
        .map_err(|e| IntegrityError {
            subject: format!("rule {}", self.id),
            expected: self.content_hash.to_string(),
            actual: e.to_string(),
        })?;
        if actual != self.content_hash || render_rule(&self.canonical) != self.body {
            return Err(IntegrityError {
                subject: format!("rule {}", self.id),
                expected: self.content_hash.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(())
    }

    /// Move to `to`, enforcing the lifecycle.
    pub fn transition(&mut self, to: RuleStatus) -> Result<(), StateTransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(StateTransitionError::InvalidTransition {
                subject: format!("rule {} v{}", self.id, self.version),
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }
}

fn content_hash(
    id: &RuleId,
    body: &str,
    priority: u32,
    category: Option<&str>,
    overrides: &[RuleId],
) -> Result<ContentDigest, CanonicalizationError> {
    let input = HashInput {
        id: id.as_str(),
        body,
        priority,
        category,
        overrides: overrides.iter().map(RuleId::as_str).collect(),
    };
    Ok(sha256_digest(&CanonicalBytes::new(&input)?))
}

/// Builder for [`Rule`]; `build` renders the body and seals the content hash.
#[derive(Debug, Clone)]
pub struct RuleBuilder {
    id: RuleId,
    version: u32,
    source_format: SourceFormat,
    canonical: CanonicalRule,
    overrides: Vec<RuleId>,
    priority: u32,
    category: Option<String>,
    status: RuleStatus,
    created_at: Option<DateTime<Utc>>,
}

impl RuleBuilder {
    /// Set the priority weight.
    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the category.
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Add an override edge (this rule yields to `winner`).
    pub fn overrides(mut self, winner: RuleId) -> Self {
        self.overrides.push(winner);
        self
    }

    /// Replace the canonical body.
    pub fn canonical(mut self, canonical: CanonicalRule) -> Self {
        self.canonical = canonical;
        self
    }

    /// Set the version number.
    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Set the initial status.
    pub fn status(mut self, status: RuleStatus) -> Self {
        self.status = status;
        self
    }

    /// Pin the creation timestamp (defaults to now).
    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    /// Render, derive predicate sets, and compute the content hash.
    pub fn build(mut self) -> Result<Rule, CanonicalizationError> {
        self.overrides.sort();
        self.overrides.dedup();
        self.overrides.retain(|w| *w != self.id);
        let body = render_rule(&self.canonical);
        let content_hash = content_hash(
            &self.id,
            &body,
            self.priority,
            self.category.as_deref(),
            &self.overrides,
        )?;
        let defines = if self.canonical.is_decision() {
            BTreeSet::new()
        } else {
            BTreeSet::from([self.canonical.head.name.clone()])
        };
        let consumes = self.canonical.consumed_predicates();
        Ok(Rule {
            id: self.id,
            version: self.version,
            source_format: self.source_format,
            canonical: self.canonical,
            body,
            content_hash,
            defines,
            consumes,
            overrides: self.overrides,
            priority: self.priority,
            category: self.category,
            status: self.status,
            created_at: self.created_at.unwrap_or_else(Utc::now),
        })
    }
}
