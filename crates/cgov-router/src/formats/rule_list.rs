//! Generic rule lists.
//!
//! ```yaml
//! rules:
//!   - name: contractors
//!     when:
//!       requester.category: contractor
//!       request.hour: {gte: 22}
//!       "@on_call": false
//!     then: deny
//!     priority: 5
//! ```
//!
//! Each entry becomes one rule. `when` maps attributes to a literal
//! (equality) or to an operator map; keys starting with `@` test a predicate.
//! A list with several entries yields identifiers `<id>.<name>` (or
//! `<id>.<n>` for unnamed entries).

use cgov_core::lang::{is_identifier, CanonicalRule, CmpOp, Expr, Ref, RefSegment, Term};
use cgov_core::{FormatError, RuleId, SourceFormat};
use serde_json::{Map, Value};

use super::{
    check_keys, conclusion_head, document, kind, malformed, opt_overrides, opt_priority,
    opt_string, unsupported, value_term, ConvertedRule, FormatConverter,
};
use crate::payload::RulePayload;

const FORMAT: SourceFormat = SourceFormat::RuleList;

/// Converter for [`SourceFormat::RuleList`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleListConverter;

impl FormatConverter for RuleListConverter {
    fn format(&self) -> SourceFormat {
        FORMAT
    }

    fn convert(&self, payload: &RulePayload) -> Result<Vec<ConvertedRule>, FormatError> {
        let doc = document(payload, FORMAT)?;
        check_keys(&doc, &["rules", "description", "category"], FORMAT, "rule list")?;
        let shared_category = opt_string(&doc, "category", FORMAT)?;
        let entries = match doc.get("rules") {
            Some(Value::Array(entries)) if !entries.is_empty() => entries,
            Some(Value::Array(_)) => return Err(malformed(FORMAT, "'rules' is empty")),
            Some(other) => {
                return Err(malformed(FORMAT, format!("'rules' must be a list, found {}", kind(other))))
            }
            None => return Err(malformed(FORMAT, "missing 'rules'")),
        };
        let many = entries.len() > 1;
        let mut out = Vec::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            let Value::Object(entry) = entry else {
                return Err(malformed(FORMAT, format!("rule #{} must be an object", i + 1)));
            };
            let mut converted = convert_entry(entry)?;
            if converted.category.is_none() {
                converted.category = shared_category.clone();
            }
            if many {
                let name = opt_string(entry, "name", FORMAT)?.unwrap_or_else(|| (i + 1).to_string());
                if RuleId::new(format!("x.{name}")).is_err() {
                    return Err(malformed(FORMAT, format!("rule name '{name}' is not a valid identifier suffix")));
                }
                converted.suffix = Some(name);
            }
            out.push(converted);
        }
        let mut suffixes: Vec<_> = out.iter().filter_map(|r| r.suffix.as_deref()).collect();
        suffixes.sort_unstable();
        if suffixes.windows(2).any(|w| w[0] == w[1]) {
            return Err(malformed(FORMAT, "rule names must be unique within a list"));
        }
        Ok(out)
    }
}

fn convert_entry(entry: &Map<String, Value>) -> Result<ConvertedRule, FormatError> {
    check_keys(
        entry,
        &["name", "when", "then", "priority", "category", "overrides", "description"],
        FORMAT,
        "rule",
    )?;
    let then = entry
        .get("then")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed(FORMAT, "rule requires a string 'then'"))?;
    let head = conclusion_head(then, FORMAT)?;

    let mut body = Vec::new();
    match entry.get("when") {
        None | Some(Value::Null) => {}
        Some(Value::Object(when)) => {
            for (key, expected) in when {
                body.extend(clause(key, expected)?);
            }
        }
        Some(other) => {
            return Err(malformed(FORMAT, format!("'when' must be an object, found {}", kind(other))))
        }
    }

    Ok(ConvertedRule {
        suffix: None,
        canonical: CanonicalRule::new(head, body),
        priority: opt_priority(entry, FORMAT)?,
        category: opt_string(entry, "category", FORMAT)?,
        overrides: opt_overrides(entry, FORMAT)?,
    })
}

fn clause(key: &str, expected: &Value) -> Result<Vec<Expr>, FormatError> {
    if let Some(predicate) = key.strip_prefix('@') {
        if !is_identifier(predicate) {
            return Err(malformed(FORMAT, format!("invalid predicate reference '{key}'")));
        }
        let expr = Expr::term(Term::Ref(Ref::ident(predicate)));
        return match expected {
            Value::Bool(true) => Ok(vec![expr]),
            Value::Bool(false) => Ok(vec![expr.negate()]),
            other => Err(malformed(FORMAT, format!("'{key}' must be true or false, found {}", kind(other)))),
        };
    }

    let target = Ref::input_path(key);
    let Value::Object(ops) = expected else {
        return Ok(vec![Expr::compare(Term::Ref(target), CmpOp::Eq, value_term(expected))]);
    };
    if ops.is_empty() {
        return Err(malformed(FORMAT, format!("empty operator map for '{key}'")));
    }
    ops.iter()
        .map(|(op, v)| {
            let cmp = match op.as_str() {
                "eq" => CmpOp::Eq,
                "ne" => CmpOp::Neq,
                "lt" => CmpOp::Lt,
                "lte" => CmpOp::Lte,
                "gt" => CmpOp::Gt,
                "gte" => CmpOp::Gte,
                "contains" => {
                    let mut elem = target.clone();
                    elem.path.push(RefSegment::Index(Term::Ref(Ref::ident("_"))));
                    return Ok(Expr::compare(Term::Ref(elem), CmpOp::Eq, value_term(v)));
                }
                "exists" => {
                    let expr = Expr::term(Term::Ref(target.clone()));
                    return match v {
                        Value::Bool(true) => Ok(expr),
                        Value::Bool(false) => Ok(expr.negate()),
                        _ => Err(malformed(FORMAT, "'exists' takes true or false")),
                    };
                }
                other => return Err(unsupported(FORMAT, format!("operator '{other}' on '{key}'"))),
            };
            Ok(Expr::compare(Term::Ref(target.clone()), cmp, value_term(v)))
        })
        .collect()
}
