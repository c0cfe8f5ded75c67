//! Structural format detection.
//!
//! Detection looks only at the shape of the payload (which keys are present,
//! whether the text is a document or policy source). It never guesses from
//! partial content: a document with none of the known marker keys is
//! undetectable and falls back to the configured default.

use cgov_core::lang::parse_rules;
use cgov_core::SourceFormat;
use serde_json::{Map, Value};

use crate::formats::parse_document_text;
use crate::payload::RulePayload;

/// Outcome of structural detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    /// A marker matched.
    Detected(SourceFormat),
    /// No marker matched; the reason explains what was seen.
    Unknown(String),
}

/// Detect the source format of `payload` by structural heuristics.
pub fn detect(payload: &RulePayload) -> Detection {
    match payload {
        RulePayload::Document(Value::Object(map)) => from_keys(map),
        RulePayload::Document(other) => {
            Detection::Unknown(format!("document is not an object: {other}"))
        }
        RulePayload::Text(text) => detect_text(text),
    }
}

fn detect_text(text: &str) -> Detection {
    if text.trim().is_empty() {
        return Detection::Unknown("empty payload".into());
    }
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text) {
        return from_keys(&map);
    }
    // Policy source is tried before YAML: a line such as `x = {"a": 1}` is
    // also a valid YAML mapping.
    let canonical = parse_rules(text);
    if canonical.is_ok() {
        return Detection::Detected(SourceFormat::Canonical);
    }
    if let Some(map) = parse_document_text(text) {
        return from_keys(&map);
    }
    if looks_like_policy_source(text) {
        return Detection::Detected(SourceFormat::Canonical);
    }
    let reason = canonical
        .err()
        .map(|e| format!("not a JSON/YAML object and not policy source ({e})"))
        .unwrap_or_else(|| "not a JSON/YAML object".into());
    Detection::Unknown(reason)
}

fn from_keys(map: &Map<String, Value>) -> Detection {
    if map.contains_key("Statement") {
        Detection::Detected(SourceFormat::AccessPolicy)
    } else if map.contains_key("rules") {
        Detection::Detected(SourceFormat::RuleList)
    } else if ["effect", "predicate", "conditions"]
        .iter()
        .any(|k| map.contains_key(*k))
    {
        Detection::Detected(SourceFormat::StructuredPolicy)
    } else {
        let keys: Vec<_> = map.keys().map(String::as_str).collect();
        Detection::Unknown(format!("no format marker among keys [{}]", keys.join(", ")))
    }
}

/// Policy source that failed to parse is still routed to the canonical
/// converter so the caller gets a positioned syntax error.
fn looks_like_policy_source(text: &str) -> bool {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with('#'))
        .is_some_and(|first| {
            first.starts_with("package ")
                || first.starts_with("default ")
                || first.ends_with('{')
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn detected(p: RulePayload) -> Option<SourceFormat> {
        match detect(&p) {
            Detection::Detected(f) => Some(f),
            Detection::Unknown(_) => None,
        }
    }

    #[test]
    fn marker_keys() {
        assert_eq!(
            detected(json!({"Statement": []}).into()),
            Some(SourceFormat::AccessPolicy)
        );
        assert_eq!(detected(json!({"rules": []}).into()), Some(SourceFormat::RuleList));
        assert_eq!(
            detected(json!({"effect": "deny"}).into()),
            Some(SourceFormat::StructuredPolicy)
        );
        assert_eq!(detected(json!({"foo": 1}).into()), None);
    }

    #[test]
    fn text_payloads() {
        assert_eq!(
            detected("{\"Statement\": {}}".into()),
            Some(SourceFormat::AccessPolicy)
        );
        assert_eq!(
            detected("rules:\n  - then: deny\n".into()),
            Some(SourceFormat::RuleList)
        );
        assert_eq!(
            detected("limits = {\"max\": 3}".into()),
            Some(SourceFormat::Canonical)
        );
        assert_eq!(
            detected("deny {\n    input.x == \n}".into()),
            Some(SourceFormat::Canonical)
        );
    }

    #[test]
    fn unknown_shapes_explain_themselves() {
        match detect(&RulePayload::Text("   ".into())) {
            Detection::Unknown(reason) => assert!(reason.contains("empty")),
            other => panic!("unexpected {other:?}"),
        }
        match detect(&json!({"name": "x"}).into()) {
            Detection::Unknown(reason) => assert!(reason.contains("name")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
