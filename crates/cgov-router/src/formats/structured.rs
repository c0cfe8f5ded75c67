//! Generic structured policy documents.
//!
//! ```yaml
//! effect: deny              # or `predicate: is_contractor` (+ optional `value`)
//! priority: 10
//! category: access
//! overrides: [legacy-allow]
//! conditions:
//!   - attribute: requester.category
//!     operator: equals
//!     value: contractor
//!   - predicate: on_call
//!     negate: true
//! ```
//!
//! `conditions` may also be written `{all: [...]}`. Disjunctive groups
//! (`any`, `or`) have no single-rule equivalent and are rejected.

use cgov_core::lang::{CanonicalRule, CmpOp, Expr, Ref, RuleHead, Term};
use cgov_core::{FormatError, SourceFormat};
use serde_json::{Map, Value};

use super::{
    check_keys, conclusion_head, document, kind, malformed, opt_overrides, opt_priority,
    opt_string, unsupported, value_term, ConvertedRule, FormatConverter,
};
use crate::payload::RulePayload;

const FORMAT: SourceFormat = SourceFormat::StructuredPolicy;

const TOP_LEVEL_KEYS: &[&str] = &[
    "id",
    "description",
    "effect",
    "predicate",
    "value",
    "conditions",
    "priority",
    "category",
    "overrides",
];

/// Converter for [`SourceFormat::StructuredPolicy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuredPolicyConverter;

impl FormatConverter for StructuredPolicyConverter {
    fn format(&self) -> SourceFormat {
        FORMAT
    }

    fn convert(&self, payload: &RulePayload) -> Result<Vec<ConvertedRule>, FormatError> {
        let doc = document(payload, FORMAT)?;
        check_keys(&doc, TOP_LEVEL_KEYS, FORMAT, "policy")?;

        let name = match (opt_string(&doc, "effect", FORMAT)?, opt_string(&doc, "predicate", FORMAT)?) {
            (Some(effect), None) => {
                let head = conclusion_head(&effect, FORMAT)?;
                if head != cgov_core::lang::ALLOW && head != cgov_core::lang::DENY {
                    return Err(malformed(FORMAT, format!("effect must be allow or deny, found '{effect}'")));
                }
                head
            }
            (None, Some(predicate)) => conclusion_head(&predicate, FORMAT)?,
            (Some(_), Some(_)) => {
                return Err(malformed(FORMAT, "'effect' and 'predicate' are mutually exclusive"))
            }
            (None, None) => return Err(malformed(FORMAT, "one of 'effect' or 'predicate' is required")),
        };
        if doc.contains_key("value") && doc.contains_key("effect") {
            return Err(malformed(FORMAT, "'value' only applies to predicate policies"));
        }

        let body = match doc.get("conditions") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => conditions(items)?,
            Some(Value::Object(group)) => {
                if let Some(key) = group.keys().find(|k| k.as_str() != "all") {
                    return Err(unsupported(FORMAT, format!("condition group '{key}'")));
                }
                match group.get("all") {
                    Some(Value::Array(items)) => conditions(items)?,
                    _ => return Err(malformed(FORMAT, "'all' must be a list of conditions")),
                }
            }
            Some(other) => {
                return Err(malformed(FORMAT, format!("'conditions' must be a list, found {}", kind(other))))
            }
        };

        let canonical = CanonicalRule {
            is_default: false,
            head: RuleHead {
                name,
                key: None,
                value: doc.get("value").map(value_term),
            },
            body,
        };
        Ok(vec![ConvertedRule {
            suffix: None,
            canonical,
            priority: opt_priority(&doc, FORMAT)?,
            category: opt_string(&doc, "category", FORMAT)?,
            overrides: opt_overrides(&doc, FORMAT)?,
        }])
    }
}

fn conditions(items: &[Value]) -> Result<Vec<Expr>, FormatError> {
    items
        .iter()
        .map(|item| match item {
            Value::Object(cond) => condition(cond),
            other => Err(malformed(FORMAT, format!("condition must be an object, found {}", kind(other)))),
        })
        .collect()
}

fn condition(cond: &Map<String, Value>) -> Result<Expr, FormatError> {
    if let Some(predicate) = cond.get("predicate") {
        check_keys(cond, &["predicate", "negate"], FORMAT, "predicate condition")?;
        let name = predicate
            .as_str()
            .filter(|p| cgov_core::lang::is_identifier(p))
            .ok_or_else(|| malformed(FORMAT, format!("invalid predicate name {predicate}")))?;
        let expr = Expr::term(Term::Ref(Ref::ident(name)));
        return Ok(match cond.get("negate") {
            None | Some(Value::Bool(false)) => expr,
            Some(Value::Bool(true)) => expr.negate(),
            Some(other) => return Err(malformed(FORMAT, format!("'negate' must be a boolean, found {}", kind(other)))),
        });
    }

    check_keys(cond, &["attribute", "operator", "value"], FORMAT, "condition")?;
    let attribute = cond
        .get("attribute")
        .and_then(Value::as_str)
        .filter(|a| !a.is_empty())
        .ok_or_else(|| malformed(FORMAT, "condition requires a string 'attribute'"))?;
    let operator = cond
        .get("operator")
        .and_then(Value::as_str)
        .unwrap_or("equals");
    let target = Ref::input_path(attribute);

    let op = match operator {
        "exists" => return Ok(Expr::term(Term::Ref(target))),
        "absent" => return Ok(Expr::term(Term::Ref(target)).negate()),
        "contains" => {
            let mut elem = target;
            elem.path.push(cgov_core::lang::RefSegment::Index(Term::Ref(Ref::ident("_"))));
            return Ok(Expr::compare(Term::Ref(elem), CmpOp::Eq, required_value(cond)?));
        }
        "equals" | "eq" | "==" => CmpOp::Eq,
        "not_equals" | "ne" | "!=" => CmpOp::Neq,
        "less_than" | "lt" | "<" => CmpOp::Lt,
        "less_than_or_equal" | "lte" | "<=" => CmpOp::Lte,
        "greater_than" | "gt" | ">" => CmpOp::Gt,
        "greater_than_or_equal" | "gte" | ">=" => CmpOp::Gte,
        other => return Err(unsupported(FORMAT, format!("operator '{other}'"))),
    };
    Ok(Expr::compare(Term::Ref(target), op, required_value(cond)?))
}

fn required_value(cond: &Map<String, Value>) -> Result<Term, FormatError> {
    cond.get("value")
        .map(value_term)
        .ok_or_else(|| malformed(FORMAT, "condition requires a 'value'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgov_core::lang::render_rule;
    use serde_json::json;

    fn convert(v: Value) -> Result<Vec<ConvertedRule>, FormatError> {
        StructuredPolicyConverter.convert(&RulePayload::Document(v))
    }

    #[test]
    fn deny_with_conditions() {
        let out = convert(json!({
            "effect": "deny",
            "priority": 10,
            "category": "access",
            "conditions": [
                {"attribute": "requester.category", "operator": "equals", "value": "contractor"},
                {"attribute": "request.hour", "operator": "gte", "value": 22},
                {"predicate": "on_call", "negate": true}
            ]
        }))
        .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].priority, Some(10));
        assert_eq!(out[0].category.as_deref(), Some("access"));
        assert_eq!(
            render_rule(&out[0].canonical),
            "deny {\n    input.requester.category == \"contractor\"\n    input.request.hour >= 22\n    not on_call\n}"
        );
    }

    #[test]
    fn predicate_policy_with_all_group() {
        let out = convert(json!({
            "predicate": "is_contractor",
            "conditions": {"all": [{"attribute": "roles", "operator": "contains", "value": "contractor"}]}
        }))
        .unwrap();
        assert_eq!(
            render_rule(&out[0].canonical),
            "is_contractor {\n    input.roles[_] == \"contractor\"\n}"
        );
    }

    #[test]
    fn yaml_text_payload() {
        let yaml = "effect: allow\nconditions:\n  - attribute: requester.team\n    value: sre\n";
        let out = StructuredPolicyConverter
            .convert(&RulePayload::Text(yaml.into()))
            .unwrap();
        assert_eq!(
            render_rule(&out[0].canonical),
            "allow {\n    input.requester.team == \"sre\"\n}"
        );
    }

    #[test]
    fn disjunction_and_unknown_operators_fail_closed() {
        let err = convert(json!({"effect": "deny", "conditions": {"any": []}})).unwrap_err();
        assert!(matches!(err, FormatError::Unsupported { .. }));
        let err = convert(json!({
            "effect": "deny",
            "conditions": [{"attribute": "ip", "operator": "cidr_match", "value": "10.0.0.0/8"}]
        }))
        .unwrap_err();
        assert!(err.to_string().contains("cidr_match"));
    }

    #[test]
    fn effect_and_predicate_are_exclusive() {
        assert!(convert(json!({"effect": "deny", "predicate": "x"})).is_err());
        assert!(convert(json!({"conditions": []})).is_err());
        assert!(convert(json!({"effect": "maybe"})).is_err());
    }
}
