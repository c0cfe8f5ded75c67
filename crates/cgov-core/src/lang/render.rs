//! Deterministic renderer. Output re-parses to an identical tree.

use std::fmt::Write;

use super::ast::{CanonicalRule, Expr, Module, Ref, RefSegment, RuleHead, Scalar, Term};

const INDENT: &str = "    ";

/// Render a whole module: package, imports, then rules separated by blank lines.
pub fn render_module(module: &Module) -> String {
    let mut out = format!("package {}\n", render_ref(&module.package));
    if !module.imports.is_empty() {
        out.push('\n');
        for import in &module.imports {
            out.push_str("import ");
            out.push_str(&render_ref(&import.path));
            if let Some(alias) = &import.alias {
                out.push_str(" as ");
                out.push_str(alias);
            }
            out.push('\n');
        }
    }
    for rule in &module.rules {
        out.push('\n');
        out.push_str(&render_rule(rule));
        out.push('\n');
    }
    out
}

/// Render one rule, without a trailing newline.
pub fn render_rule(rule: &CanonicalRule) -> String {
    let mut out = String::new();
    if rule.is_default {
        out.push_str("default ");
    }
    out.push_str(&render_head(&rule.head));
    if !rule.body.is_empty() {
        out.push_str(" {\n");
        for expr in &rule.body {
            out.push_str(INDENT);
            out.push_str(&render_expr(expr));
            out.push('\n');
        }
        out.push('}');
    }
    out
}

fn render_head(head: &RuleHead) -> String {
    let mut out = head.name.clone();
    if let Some(key) = &head.key {
        let _ = write!(out, "[{}]", render_term(key));
    }
    if let Some(value) = &head.value {
        let _ = write!(out, " = {}", render_term(value));
    }
    out
}

/// Render one body expression.
pub fn render_expr(expr: &Expr) -> String {
    let mut out = String::new();
    if expr.negated {
        out.push_str("not ");
    }
    out.push_str(&render_term(&expr.lhs));
    if let Some((op, rhs)) = &expr.cmp {
        let _ = write!(out, " {} {}", op.as_str(), render_term(rhs));
    }
    out
}

/// Render a term.
pub fn render_term(term: &Term) -> String {
    match term {
        Term::Scalar(s) => render_scalar(s),
        Term::Ref(r) => render_ref(r),
        Term::Call { func, args } => format!("{}({})", render_ref(func), join(args)),
        Term::Array(items) => format!("[{}]", join(items)),
        Term::Object(pairs) => {
            let inner = pairs
                .iter()
                .map(|(k, v)| format!("{}: {}", render_term(k), render_term(v)))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{{{inner}}}")
        }
    }
}

fn join(terms: &[Term]) -> String {
    terms.iter().map(render_term).collect::<Vec<_>>().join(", ")
}

/// Render a reference.
pub fn render_ref(r: &Ref) -> String {
    let mut out = r.head.clone();
    for seg in &r.path {
        match seg {
            RefSegment::Field(f) => {
                out.push('.');
                out.push_str(f);
            }
            RefSegment::Index(t) => {
                let _ = write!(out, "[{}]", render_term(t));
            }
        }
    }
    out
}

fn render_scalar(s: &Scalar) -> String {
    match s {
        Scalar::Null => "null".into(),
        Scalar::Bool(b) => b.to_string(),
        Scalar::Number(n) => n.clone(),
        Scalar::String(s) => quote(s),
    }
}

/// JSON-compatible string quoting.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::ast::CmpOp;
    use crate::lang::parse_rule;

    #[test]
    fn renders_with_four_space_indent() {
        let rule = CanonicalRule {
            is_default: false,
            head: RuleHead {
                name: "deny_matches".into(),
                key: Some(Term::string("r-1")),
                value: None,
            },
            body: vec![
                Expr::compare(
                    Term::reference("input.requester.category"),
                    CmpOp::Eq,
                    Term::string("contractor"),
                ),
                Expr::term(Term::reference("on_call")).negate(),
            ],
        };
        assert_eq!(
            render_rule(&rule),
            "deny_matches[\"r-1\"] {\n    input.requester.category == \"contractor\"\n    not on_call\n}"
        );
    }

    #[test]
    fn quoting_escapes_control_characters() {
        assert_eq!(quote("a\"b\\\u{1}"), "\"a\\\"b\\\\\\u0001\"");
    }

    #[test]
    fn reparse_is_identity_for_nested_terms() {
        let src = "limits[\"x\"] = {\"max\": [1, -2.5, null], \"ok\": true} {\n    count(input.items) <= 10\n    input.meta[\"a-b\"] != \"q\\nr\"\n}";
        let rule = parse_rule(src).unwrap();
        assert_eq!(render_rule(&rule), src);
        assert_eq!(parse_rule(&render_rule(&rule)).unwrap(), rule);
    }
}
