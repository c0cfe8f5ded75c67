//! Syntax tree for the canonical policy language.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Literal scalar value. Numbers keep their source text so rendering is
/// byte-stable (no float round-tripping).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Scalar {
    /// `null`
    Null,
    /// `true` / `false`
    Bool(bool),
    /// Integer or decimal literal, stored as written.
    Number(String),
    /// Double-quoted string literal (unescaped content).
    String(String),
}

impl Scalar {
    /// Numeric value, if this is a number literal.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Number(n) => n.parse().ok(),
            _ => None,
        }
    }
}

/// One step in a reference path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RefSegment {
    /// `.name`
    Field(String),
    /// `[term]`
    Index(Term),
}

/// A dotted/indexed reference such as `input.requester.roles[_]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ref {
    /// Leading identifier (`input`, `data`, a predicate name, a variable).
    pub head: String,
    /// Path segments after the head.
    pub path: Vec<RefSegment>,
}

impl Ref {
    /// A bare identifier reference.
    pub fn ident(name: impl Into<String>) -> Self {
        Self {
            head: name.into(),
            path: Vec::new(),
        }
    }

    /// Build a dotted reference from `a.b.c` style segments.
    pub fn dotted(dotted: &str) -> Self {
        let mut parts = dotted.split('.');
        let head = parts.next().unwrap_or_default().to_string();
        Self {
            head,
            path: parts.map(|p| RefSegment::Field(p.to_string())).collect(),
        }
    }

    /// Whether this ref reads the request document.
    pub fn is_input(&self) -> bool {
        self.head == "input"
    }
}

/// A term: the operand of an expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Term {
    /// Literal.
    Scalar(Scalar),
    /// Reference.
    Ref(Ref),
    /// Built-in function call, e.g. `count(deny_matches)`.
    Call {
        /// Function reference.
        func: Ref,
        /// Arguments in order.
        args: Vec<Term>,
    },
    /// `[a, b]`
    Array(Vec<Term>),
    /// `{"k": v}`, pairs in source order.
    Object(Vec<(Term, Term)>),
}

impl Term {
    /// String literal helper.
    pub fn string(s: impl Into<String>) -> Self {
        Term::Scalar(Scalar::String(s.into()))
    }

    /// Boolean literal helper.
    pub fn boolean(b: bool) -> Self {
        Term::Scalar(Scalar::Bool(b))
    }

    /// Reference helper from dotted text.
    pub fn reference(dotted: &str) -> Self {
        Term::Ref(Ref::dotted(dotted))
    }

    /// The literal, if this term is a scalar.
    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Term::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// The reference, if this term is one.
    pub fn as_ref(&self) -> Option<&Ref> {
        match self {
            Term::Ref(r) => Some(r),
            _ => None,
        }
    }
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    /// `==`
    Eq,
    /// `!=`
    Neq,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `>`
    Gt,
    /// `>=`
    Gte,
}

impl CmpOp {
    /// Operator text.
    pub fn as_str(&self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Neq => "!=",
            CmpOp::Lt => "<",
            CmpOp::Lte => "<=",
            CmpOp::Gt => ">",
            CmpOp::Gte => ">=",
        }
    }

    /// The operator with operands swapped (`a < b` ⇔ `b > a`).
    pub fn flipped(&self) -> CmpOp {
        match self {
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::Lte => CmpOp::Gte,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::Gte => CmpOp::Lte,
            other => *other,
        }
    }
}

/// A body expression: an optionally negated term, optionally compared to another.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Expr {
    /// Leading `not`.
    pub negated: bool,
    /// Left operand (or the whole expression when there is no comparison).
    pub lhs: Term,
    /// Comparison operator and right operand.
    pub cmp: Option<(CmpOp, Term)>,
}

impl Expr {
    /// `lhs <op> rhs`
    pub fn compare(lhs: Term, op: CmpOp, rhs: Term) -> Self {
        Self {
            negated: false,
            lhs,
            cmp: Some((op, rhs)),
        }
    }

    /// A bare term expression (truthiness test).
    pub fn term(lhs: Term) -> Self {
        Self {
            negated: false,
            lhs,
            cmp: None,
        }
    }

    /// The same expression negated.
    pub fn negate(mut self) -> Self {
        self.negated = !self.negated;
        self
    }
}

/// Rule head: `name`, `name[key]`, `name = value`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleHead {
    /// Predicate name the rule defines.
    pub name: String,
    /// Partial-set key (`deny_matches["r1"]`).
    pub key: Option<Term>,
    /// Assigned value; `None` means `true`.
    pub value: Option<Term>,
}

/// A single rule: head plus conjunctive body.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalRule {
    /// `default` rules have no body.
    pub is_default: bool,
    /// Head.
    pub head: RuleHead,
    /// Body expressions, all of which must hold.
    pub body: Vec<Expr>,
}

/// Decision heads produced by every source format.
pub const ALLOW: &str = "allow";
/// See [`ALLOW`].
pub const DENY: &str = "deny";

impl CanonicalRule {
    /// A rule concluding `name` (value `true`) when every expression in `body` holds.
    pub fn new(name: impl Into<String>, body: Vec<Expr>) -> Self {
        Self {
            is_default: false,
            head: RuleHead {
                name: name.into(),
                key: None,
                value: None,
            },
            body,
        }
    }

    /// Whether the head is one of the two decision predicates.
    pub fn is_decision(&self) -> bool {
        self.head.name == ALLOW || self.head.name == DENY
    }

    /// The conclusion this rule asserts: head name and value (default `true`).
    pub fn conclusion(&self) -> (String, Term) {
        (
            self.head.name.clone(),
            self.head.value.clone().unwrap_or(Term::boolean(true)),
        )
    }

    /// Predicates this rule reads from other rules.
    ///
    /// A predicate is a bare identifier (or `data.rules.<name>`) used at the
    /// top of an expression operand. `input`, `data` roots, wildcard `_` and
    /// identifiers appearing only inside an index are not predicates.
    pub fn consumed_predicates(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for expr in &self.body {
            collect_predicates(&expr.lhs, &mut out);
            if let Some((_, rhs)) = &expr.cmp {
                collect_predicates(rhs, &mut out);
            }
        }
        out.remove(&self.head.name);
        out
    }
}

fn collect_predicates(term: &Term, out: &mut BTreeSet<String>) {
    match term {
        Term::Ref(r) => {
            if r.head == "data" {
                if let (Some(RefSegment::Field(ns)), Some(RefSegment::Field(name))) =
                    (r.path.first(), r.path.get(1))
                {
                    if ns == "rules" {
                        out.insert(name.clone());
                    }
                }
            } else if r.head != "input" && r.head != "_" {
                out.insert(r.head.clone());
            }
        }
        Term::Call { args, .. } => args.iter().for_each(|a| collect_predicates(a, out)),
        Term::Array(items) => items.iter().for_each(|a| collect_predicates(a, out)),
        Term::Object(pairs) => pairs.iter().for_each(|(_, v)| collect_predicates(v, out)),
        Term::Scalar(_) => {}
    }
}

/// An `import` declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Import {
    /// Imported path.
    pub path: Ref,
    /// Optional alias.
    pub alias: Option<String>,
}

/// A complete module: package, imports, rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    /// Package path.
    pub package: Ref,
    /// Imports in source order.
    pub imports: Vec<Import>,
    /// Rules in source order.
    pub rules: Vec<CanonicalRule>,
}
