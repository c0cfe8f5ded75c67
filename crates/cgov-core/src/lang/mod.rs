//! # Canonical Policy Language
//!
//! A Rego-compatible subset: one `package`, optional imports, and rules of
//! the form `head { expr; expr; ... }`. Every source format is converted into
//! this language, and compiled bundles are modules written in it.
//!
//! Rendering is deterministic (four-space indent, one expression per line,
//! JSON string quoting), and `parse_rule(&render_rule(r)) == r` holds for
//! every well-formed rule.

mod ast;
mod lexer;
mod parser;
mod render;

pub use ast::{
    CanonicalRule, CmpOp, Expr, Import, Module, Ref, RefSegment, RuleHead, Scalar, Term, ALLOW,
    DENY,
};
pub use parser::{parse_module, parse_rule, parse_rules};
pub use render::{quote, render_expr, render_module, render_ref, render_rule, render_term};

/// Whether `s` can be used as a bare identifier (predicate, field, variable).
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !parser::is_reserved(s)
}

/// Heads the bundle compiler emits itself. Submitted rules may not define them.
pub fn is_compiler_reserved(name: &str) -> bool {
    matches!(name, "allow_matches" | "deny_matches" | "decision") || name.starts_with("__")
}

/// A lex or parse failure with its 1-based source position.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{line}:{column}: {message}")]
pub struct SyntaxError {
    /// 1-based line.
    pub line: usize,
    /// 1-based column.
    pub column: usize,
    /// What went wrong.
    pub message: String,
}

impl SyntaxError {
    pub(crate) fn new(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
        }
    }
}

impl Ref {
    /// Append a path segment for `key`: a field when it is an identifier,
    /// otherwise a string index (`["x-y"]`), so rendering stays parseable.
    pub fn push_key(&mut self, key: &str) {
        if is_identifier(key) {
            self.path.push(RefSegment::Field(key.to_string()));
        } else {
            self.path.push(RefSegment::Index(Term::string(key)));
        }
    }

    /// Build `input.<a>.<b>...` from a slash- or dot-separated attribute path.
    pub fn input_path(attr: &str) -> Self {
        let mut r = Ref::ident("input");
        for part in attr.split(['.', '/']).filter(|p| !p.is_empty()) {
            r.push_key(part);
        }
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_rules() {
        assert!(is_identifier("is_contractor"));
        assert!(is_identifier("_"));
        assert!(!is_identifier("1abc"));
        assert!(!is_identifier("a-b"));
        assert!(!is_identifier("not"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn compiler_reserved_heads() {
        assert!(is_compiler_reserved("deny_matches"));
        assert!(is_compiler_reserved("__excl_a_b"));
        assert!(!is_compiler_reserved("deny"));
    }

    #[test]
    fn input_path_quotes_non_identifiers() {
        let r = Ref::input_path("requester/aws:SourceIp");
        assert_eq!(render_ref(&r), "input.requester[\"aws:SourceIp\"]");
        assert_eq!(parse_rule(&format!("allow {{\n    {}\n}}", render_ref(&r))).unwrap().body[0].lhs, Term::Ref(r));
    }

    #[test]
    fn syntax_error_display() {
        let err = SyntaxError::new(3, 7, "expected term");
        assert_eq!(err.to_string(), "3:7: expected term");
    }
}
