//! Vendor-style access policies.
//!
//! ```json
//! {
//!   "Version": "2012-10-17",
//!   "Statement": [{
//!     "Sid": "DenyContractorsAfterHours",
//!     "Effect": "Deny",
//!     "Action": ["records:Read", "records:Export"],
//!     "Resource": "*",
//!     "Condition": {
//!       "StringEquals": {"requester.category": "contractor"},
//!       "NumericGreaterThanEquals": {"request.hour": "22"}
//!     }
//!   }]
//! }
//! ```
//!
//! Multi-valued `Action`, `Resource`, `Principal` and equality conditions
//! are disjunctions; each statement expands into one rule per combination
//! (bounded by [`MAX_EXPANSION`]). `NotAction`, `NotResource`,
//! `NotPrincipal`, wildcard patterns other than a bare `*`, and condition
//! operators without a canonical equivalent are rejected.

use cgov_core::lang::{CanonicalRule, CmpOp, Expr, Ref, Scalar, Term};
use cgov_core::{FormatError, SourceFormat};
use serde_json::{Map, Value};

use super::{
    check_keys, conclusion_head, document, kind, malformed, one_or_many, unsupported,
    ConvertedRule, FormatConverter,
};
use crate::payload::RulePayload;

const FORMAT: SourceFormat = SourceFormat::AccessPolicy;

/// Upper bound on rules produced from a single statement.
pub const MAX_EXPANSION: usize = 32;

/// Converter for [`SourceFormat::AccessPolicy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessPolicyConverter;

impl FormatConverter for AccessPolicyConverter {
    fn format(&self) -> SourceFormat {
        FORMAT
    }

    fn convert(&self, payload: &RulePayload) -> Result<Vec<ConvertedRule>, FormatError> {
        let doc = document(payload, FORMAT)?;
        check_keys(&doc, &["Version", "Id", "Statement"], FORMAT, "policy")?;
        let statements = match doc.get("Statement") {
            Some(Value::Array(items)) if !items.is_empty() => items.iter().collect::<Vec<_>>(),
            Some(obj @ Value::Object(_)) => vec![obj],
            Some(Value::Array(_)) => return Err(malformed(FORMAT, "'Statement' is empty")),
            Some(other) => {
                return Err(malformed(FORMAT, format!("'Statement' must be an object or list, found {}", kind(other))))
            }
            None => return Err(malformed(FORMAT, "missing 'Statement'")),
        };

        let mut per_statement = Vec::with_capacity(statements.len());
        for (i, stmt) in statements.iter().enumerate() {
            let Value::Object(stmt) = stmt else {
                return Err(malformed(FORMAT, format!("statement #{} must be an object", i + 1)));
            };
            let label = match stmt.get("Sid").and_then(Value::as_str) {
                Some(sid) if !sid.is_empty() => sid.to_string(),
                _ => (i + 1).to_string(),
            };
            per_statement.push((label, statement(stmt)?));
        }

        let total: usize = per_statement.iter().map(|(_, rules)| rules.len()).sum();
        let mut out = Vec::with_capacity(total);
        for (label, rules) in per_statement {
            let expanded = rules.len() > 1;
            for (j, canonical) in rules.into_iter().enumerate() {
                let suffix = match (total > 1, expanded) {
                    (false, _) => None,
                    (true, false) => Some(label.clone()),
                    (true, true) => Some(format!("{label}.{}", j + 1)),
                };
                out.push(ConvertedRule {
                    suffix,
                    ..ConvertedRule::bare(canonical)
                });
            }
        }
        Ok(out)
    }
}

fn statement(stmt: &Map<String, Value>) -> Result<Vec<CanonicalRule>, FormatError> {
    for negated in ["NotAction", "NotResource", "NotPrincipal"] {
        if stmt.contains_key(negated) {
            return Err(unsupported(FORMAT, negated));
        }
    }
    check_keys(
        stmt,
        &["Sid", "Effect", "Principal", "Action", "Resource", "Condition"],
        FORMAT,
        "statement",
    )?;
    let effect = stmt
        .get("Effect")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed(FORMAT, "statement requires 'Effect'"))?;
    let head = conclusion_head(effect, FORMAT)?;
    if head != cgov_core::lang::ALLOW && head != cgov_core::lang::DENY {
        return Err(malformed(FORMAT, format!("Effect must be Allow or Deny, found '{effect}'")));
    }

    // Each inner Vec is a set of alternatives; the rule body takes one from each.
    let mut choices: Vec<Vec<Vec<Expr>>> = Vec::new();
    let mut fixed: Vec<Expr> = Vec::new();

    if let Some(principal) = stmt.get("Principal") {
        principal_choices(principal, &mut choices)?;
    }
    for (key, attr) in [("Action", "action"), ("Resource", "resource")] {
        if let Some(v) = stmt.get(key) {
            if let Some(alts) = equality_alternatives(Ref::input_path(attr), v, key)? {
                choices.push(alts);
            }
        }
    }
    if let Some(cond) = stmt.get("Condition") {
        let Value::Object(cond) = cond else {
            return Err(malformed(FORMAT, "'Condition' must be an object"));
        };
        for (op, block) in cond {
            condition_block(op, block, &mut choices, &mut fixed)?;
        }
    }

    let combos = choices.iter().map(Vec::len).product::<usize>();
    if combos > MAX_EXPANSION {
        return Err(unsupported(
            FORMAT,
            format!("statement expands to {combos} rules (limit {MAX_EXPANSION})"),
        ));
    }

    let mut bodies: Vec<Vec<Expr>> = vec![Vec::new()];
    for alts in &choices {
        bodies = bodies
            .iter()
            .flat_map(|prefix| {
                alts.iter().map(move |alt| {
                    let mut b = prefix.clone();
                    b.extend(alt.iter().cloned());
                    b
                })
            })
            .collect();
    }
    Ok(bodies
        .into_iter()
        .map(|mut body| {
            body.extend(fixed.iter().cloned());
            CanonicalRule::new(head.clone(), body)
        })
        .collect())
}

fn principal_choices(principal: &Value, choices: &mut Vec<Vec<Vec<Expr>>>) -> Result<(), FormatError> {
    match principal {
        Value::String(s) if s == "*" => Ok(()),
        Value::Object(types) => {
            for (ty, v) in types {
                let mut target = Ref::input_path("principal");
                target.push_key(ty);
                if let Some(alts) = equality_alternatives(target, v, "Principal")? {
                    choices.push(alts);
                }
            }
            Ok(())
        }
        other => Err(malformed(FORMAT, format!("'Principal' must be \"*\" or an object, found {}", kind(other)))),
    }
}

/// `target == v` alternatives for each listed value. A bare `*` means
/// "unconstrained" and yields `None`.
fn equality_alternatives(
    target: Ref,
    v: &Value,
    field: &str,
) -> Result<Option<Vec<Vec<Expr>>>, FormatError> {
    let values = one_or_many(v);
    if values.is_empty() {
        return Err(malformed(FORMAT, format!("'{field}' is empty")));
    }
    let mut alts = Vec::with_capacity(values.len());
    for value in values {
        let Value::String(s) = value else {
            return Err(malformed(FORMAT, format!("'{field}' values must be strings, found {}", kind(value))));
        };
        if s == "*" {
            return Ok(None);
        }
        if s.contains('*') || s.contains('?') {
            return Err(unsupported(FORMAT, format!("wildcard pattern '{s}' in {field}")));
        }
        alts.push(vec![Expr::compare(
            Term::Ref(target.clone()),
            CmpOp::Eq,
            Term::string(s.clone()),
        )]);
    }
    Ok(Some(alts))
}

fn condition_block(
    op: &str,
    block: &Value,
    choices: &mut Vec<Vec<Vec<Expr>>>,
    fixed: &mut Vec<Expr>,
) -> Result<(), FormatError> {
    let Value::Object(block) = block else {
        return Err(malformed(FORMAT, format!("condition '{op}' must be an object")));
    };
    let (cmp, numeric) = match op {
        "StringEquals" => (CmpOp::Eq, false),
        "StringNotEquals" => (CmpOp::Neq, false),
        "NumericEquals" => (CmpOp::Eq, true),
        "NumericNotEquals" => (CmpOp::Neq, true),
        "NumericLessThan" => (CmpOp::Lt, true),
        "NumericLessThanEquals" => (CmpOp::Lte, true),
        "NumericGreaterThan" => (CmpOp::Gt, true),
        "NumericGreaterThanEquals" => (CmpOp::Gte, true),
        "Bool" => (CmpOp::Eq, false),
        other => return Err(unsupported(FORMAT, format!("condition operator '{other}'"))),
    };
    for (key, v) in block {
        let target = Ref::input_path(key);
        let mut terms = Vec::new();
        for value in one_or_many(v) {
            terms.push(condition_value(op, value, numeric)?);
        }
        if terms.is_empty() {
            return Err(malformed(FORMAT, format!("condition '{op}' on '{key}' has no values")));
        }
        let exprs: Vec<Expr> = terms
            .into_iter()
            .map(|t| Expr::compare(Term::Ref(target.clone()), cmp, t))
            .collect();
        match cmp {
            // "equals any of" is a disjunction; "not equal to any of" is a conjunction.
            CmpOp::Eq if exprs.len() > 1 => choices.push(exprs.into_iter().map(|e| vec![e]).collect()),
            CmpOp::Eq | CmpOp::Neq => fixed.extend(exprs),
            _ if exprs.len() > 1 => {
                return Err(unsupported(FORMAT, format!("multiple values for '{op}' on '{key}'")))
            }
            _ => fixed.extend(exprs),
        }
    }
    Ok(())
}

fn condition_value(op: &str, value: &Value, numeric: bool) -> Result<Term, FormatError> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => return Err(malformed(FORMAT, format!("'{op}' value must be a scalar, found {}", kind(other)))),
    };
    if op == "Bool" {
        return match text.as_str() {
            "true" => Ok(Term::boolean(true)),
            "false" => Ok(Term::boolean(false)),
            _ => Err(malformed(FORMAT, format!("Bool condition value '{text}' is not true/false"))),
        };
    }
    if numeric {
        let numeric_chars = text.chars().all(|c| c.is_ascii_digit() || "-.eE+".contains(c));
        if !numeric_chars || text.parse::<f64>().is_err() || text.starts_with(['+', '.']) {
            return Err(malformed(FORMAT, format!("'{op}' value '{text}' is not a number")));
        }
        return Ok(Term::Scalar(Scalar::Number(text)));
    }
    Ok(Term::string(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgov_core::lang::render_rule;
    use serde_json::json;

    fn convert(v: Value) -> Result<Vec<ConvertedRule>, FormatError> {
        AccessPolicyConverter.convert(&RulePayload::Document(v))
    }

    #[test]
    fn single_statement_single_rule() {
        let out = convert(json!({
            "Version": "2012-10-17",
            "Statement": {
                "Effect": "Deny",
                "Action": "records:Export",
                "Resource": "*",
                "Condition": {
                    "StringEquals": {"requester.category": "contractor"},
                    "NumericGreaterThanEquals": {"request.hour": "22"}
                }
            }
        }))
        .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].suffix, None);
        assert_eq!(
            render_rule(&out[0].canonical),
            "deny {\n    input.action == \"records:Export\"\n    input.request.hour >= 22\n    input.requester.category == \"contractor\"\n}"
        );
    }

    #[test]
    fn multi_valued_action_expands() {
        let out = convert(json!({
            "Statement": [{
                "Sid": "ReadOps",
                "Effect": "Allow",
                "Principal": {"team": ["sre", "dba"]},
                "Action": ["records:Read", "records:List"]
            }]
        }))
        .unwrap();
        assert_eq!(out.len(), 4);
        let suffixes: Vec<_> = out.iter().map(|r| r.suffix.clone().unwrap()).collect();
        assert_eq!(suffixes, vec!["ReadOps.1", "ReadOps.2", "ReadOps.3", "ReadOps.4"]);
        assert_eq!(
            render_rule(&out[0].canonical),
            "allow {\n    input.principal.team == \"sre\"\n    input.action == \"records:Read\"\n}"
        );
    }

    #[test]
    fn not_equals_values_are_conjunctive() {
        let out = convert(json!({
            "Statement": {"Effect": "Deny", "Condition": {"StringNotEquals": {"region": ["eu", "us"]}}}
        }))
        .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].canonical.body.len(), 2);
    }

    #[test]
    fn unsupported_constructs_fail_closed() {
        for stmt in [
            json!({"Effect": "Deny", "NotAction": "x"}),
            json!({"Effect": "Deny", "Action": "records:*"}),
            json!({"Effect": "Deny", "Condition": {"IpAddress": {"aws:SourceIp": "10.0.0.0/8"}}}),
        ] {
            let err = convert(json!({"Statement": stmt})).unwrap_err();
            assert!(matches!(err, FormatError::Unsupported { .. }), "{err}");
        }
    }

    #[test]
    fn expansion_is_bounded() {
        let actions: Vec<String> = (0..6).map(|i| format!("a:{i}")).collect();
        let resources: Vec<String> = (0..6).map(|i| format!("r:{i}")).collect();
        let err = convert(json!({"Statement": {"Effect": "Allow", "Action": actions, "Resource": resources}}))
            .unwrap_err();
        assert!(err.to_string().contains("36 rules"));
    }

    #[test]
    fn numeric_values_validated() {
        let err = convert(json!({
            "Statement": {"Effect": "Deny", "Condition": {"NumericLessThan": {"age": "young"}}}
        }))
        .unwrap_err();
        assert!(matches!(err, FormatError::Malformed { .. }));
    }
}
