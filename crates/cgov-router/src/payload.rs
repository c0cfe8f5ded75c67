//! Router input and output types.

use cgov_core::lang::CanonicalRule;
use cgov_core::{RuleId, SourceFormat};
use serde::{Deserialize, Serialize};

/// Rule content as submitted: either text (JSON, YAML or canonical policy
/// source) or an already-parsed structured document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RulePayload {
    /// Raw text.
    Text(String),
    /// Parsed JSON document.
    Document(serde_json::Value),
}

impl From<&str> for RulePayload {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<serde_json::Value> for RulePayload {
    fn from(v: serde_json::Value) -> Self {
        Self::Document(v)
    }
}

/// A candidate rule before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRule {
    /// Identifier the caller assigned.
    pub id: RuleId,
    /// Submitted content.
    pub payload: RulePayload,
}

impl RawRule {
    /// Pair an identifier with a payload.
    pub fn new(id: RuleId, payload: impl Into<RulePayload>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }
}

/// A validated canonical rule plus the metadata its source carried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRule {
    /// Rule identifier. Payloads that expand into several rules get
    /// `<id>.<suffix>` identifiers.
    pub id: RuleId,
    /// Format the payload was converted from.
    pub format: SourceFormat,
    /// The canonical rule.
    pub canonical: CanonicalRule,
    /// Priority declared inside the payload, if any.
    pub priority: Option<u32>,
    /// Category declared inside the payload, if any.
    pub category: Option<String>,
    /// Override edges declared inside the payload.
    pub overrides: Vec<RuleId>,
}
