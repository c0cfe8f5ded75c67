//! Per-format converters and the helpers they share.

pub mod access_policy;
pub mod canonical;
pub mod rule_list;
pub mod structured;

use cgov_core::lang::{is_identifier, CanonicalRule, Scalar, Term, ALLOW, DENY};
use cgov_core::{FormatError, RuleId, SourceFormat};
use serde_json::{Map, Value};

use crate::payload::RulePayload;

/// One canonical rule produced by a converter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedRule {
    /// Identifier suffix when a payload expands into several rules.
    pub suffix: Option<String>,
    /// The converted rule.
    pub canonical: CanonicalRule,
    /// Priority carried by the payload.
    pub priority: Option<u32>,
    /// Category carried by the payload.
    pub category: Option<String>,
    /// Override edges carried by the payload.
    pub overrides: Vec<RuleId>,
}

impl ConvertedRule {
    pub(crate) fn bare(canonical: CanonicalRule) -> Self {
        Self {
            suffix: None,
            canonical,
            priority: None,
            category: None,
            overrides: Vec::new(),
        }
    }
}

/// Converts one source format into canonical rules.
pub trait FormatConverter: Send + Sync {
    /// The format this converter handles.
    fn format(&self) -> SourceFormat;

    /// Convert a payload. Unsupported constructs must fail, never be skipped.
    fn convert(&self, payload: &RulePayload) -> Result<Vec<ConvertedRule>, FormatError>;
}

/// The converter for `format`.
pub fn converter_for(format: SourceFormat) -> &'static dyn FormatConverter {
    match format {
        SourceFormat::StructuredPolicy => &structured::StructuredPolicyConverter,
        SourceFormat::RuleList => &rule_list::RuleListConverter,
        SourceFormat::AccessPolicy => &access_policy::AccessPolicyConverter,
        SourceFormat::Canonical => &canonical::CanonicalConverter,
    }
}

/// Parse text as a JSON object, falling back to a YAML mapping.
pub(crate) fn parse_document_text(text: &str) -> Option<Map<String, Value>> {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text) {
        return Some(map);
    }
    match serde_yaml::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// The payload as an object, or a `Malformed` error.
pub(crate) fn document(
    payload: &RulePayload,
    format: SourceFormat,
) -> Result<Map<String, Value>, FormatError> {
    match payload {
        RulePayload::Document(Value::Object(map)) => Ok(map.clone()),
        RulePayload::Document(other) => Err(malformed(
            format,
            format!("expected an object, found {}", kind(other)),
        )),
        RulePayload::Text(text) => parse_document_text(text)
            .ok_or_else(|| malformed(format, "payload is not a JSON or YAML object")),
    }
}

pub(crate) fn malformed(format: SourceFormat, message: impl Into<String>) -> FormatError {
    FormatError::Malformed {
        format,
        message: message.into(),
    }
}

pub(crate) fn unsupported(format: SourceFormat, construct: impl Into<String>) -> FormatError {
    FormatError::Unsupported {
        format,
        construct: construct.into(),
    }
}

/// Reject keys outside `allowed`. Unknown keys may carry logic, so they fail closed.
pub(crate) fn check_keys(
    map: &Map<String, Value>,
    allowed: &[&str],
    format: SourceFormat,
    context: &str,
) -> Result<(), FormatError> {
    match map.keys().find(|k| !allowed.contains(&k.as_str())) {
        Some(key) => Err(unsupported(format, format!("{context} key '{key}'"))),
        None => Ok(()),
    }
}

pub(crate) fn opt_priority(
    map: &Map<String, Value>,
    format: SourceFormat,
) -> Result<Option<u32>, FormatError> {
    match map.get("priority") {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| malformed(format, format!("priority must be a non-negative integer, found {v}"))),
    }
}

pub(crate) fn opt_string(
    map: &Map<String, Value>,
    key: &str,
    format: SourceFormat,
) -> Result<Option<String>, FormatError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(malformed(
            format,
            format!("'{key}' must be a string, found {}", kind(other)),
        )),
    }
}

pub(crate) fn opt_overrides(
    map: &Map<String, Value>,
    format: SourceFormat,
) -> Result<Vec<RuleId>, FormatError> {
    match map.get("overrides") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .and_then(|s| RuleId::new(s).ok())
                    .ok_or_else(|| malformed(format, format!("invalid override rule id {v}")))
            })
            .collect(),
        Some(other) => Err(malformed(
            format,
            format!("'overrides' must be a list, found {}", kind(other)),
        )),
    }
}

/// Map an effect/conclusion name to a rule head: `allow`, `deny` (any case)
/// or a custom predicate identifier.
pub(crate) fn conclusion_head(name: &str, format: SourceFormat) -> Result<String, FormatError> {
    let lower = name.to_ascii_lowercase();
    if lower == ALLOW || lower == DENY {
        Ok(lower)
    } else if is_identifier(name) {
        Ok(name.to_string())
    } else {
        Err(malformed(format, format!("invalid conclusion '{name}'")))
    }
}

/// A JSON value as a canonical literal term. Numbers keep their JSON text.
pub(crate) fn value_term(v: &Value) -> Term {
    match v {
        Value::Null => Term::Scalar(Scalar::Null),
        Value::Bool(b) => Term::boolean(*b),
        Value::Number(n) => Term::Scalar(Scalar::Number(n.to_string())),
        Value::String(s) => Term::string(s.clone()),
        Value::Array(items) => Term::Array(items.iter().map(value_term).collect()),
        Value::Object(map) => Term::Object(
            map.iter()
                .map(|(k, v)| (Term::string(k.clone()), value_term(v)))
                .collect(),
        ),
    }
}

pub(crate) fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

/// A value that may be a single item or a list of items.
pub(crate) fn one_or_many(v: &Value) -> Vec<&Value> {
    match v {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}
