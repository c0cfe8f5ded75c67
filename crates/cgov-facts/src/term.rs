//! Terms, atoms and clauses.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A constant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// `true` or `false`.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// String or bare symbol.
    Str(String),
}

impl Value {
    /// A string constant.
    pub fn str(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }

    /// The constant as JSON.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(n) => serde_json::Value::from(*n),
            Self::Str(s) => serde_json::Value::String(s.clone()),
        }
    }

    fn is_symbol(s: &str) -> bool {
        let mut chars = s.chars();
        chars.next().is_some_and(|c| c.is_ascii_lowercase())
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            && s != "true"
            && s != "false"
            && s != "not"
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) if Self::is_symbol(s) => f.write_str(s),
            Self::Str(s) => write!(f, "{s:?}"),
        }
    }
}

/// A variable or a constant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Term {
    /// Variable; `_` is anonymous.
    Var(String),
    /// Constant.
    Const(Value),
}

impl Term {
    /// Variable name, unless anonymous or constant.
    pub fn named_var(&self) -> Option<&str> {
        match self {
            Self::Var(v) if v != "_" => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Var(v) => f.write_str(v),
            Self::Const(c) => c.fmt(f),
        }
    }
}

/// `predicate(arg, ...)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Atom {
    /// Predicate name.
    pub predicate: String,
    /// Arguments.
    pub args: Vec<Term>,
}

impl Atom {
    /// Named variables, in first-occurrence order.
    pub fn variables(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for v in self.args.iter().filter_map(Term::named_var) {
            if !seen.contains(&v) {
                seen.push(v);
            }
        }
        seen
    }

    /// The atom as a fact, when it has no variables.
    pub fn to_ground(&self) -> Option<GroundAtom> {
        let args = self
            .args
            .iter()
            .map(|t| match t {
                Term::Const(c) => Some(c.clone()),
                Term::Var(_) => None,
            })
            .collect::<Option<Vec<_>>>()?;
        Some(GroundAtom {
            predicate: self.predicate.clone(),
            args,
        })
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.predicate)?;
        if self.args.is_empty() {
            return Ok(());
        }
        f.write_str("(")?;
        for (i, a) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            a.fmt(f)?;
        }
        f.write_str(")")
    }
}

/// A fact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroundAtom {
    /// Predicate name.
    pub predicate: String,
    /// Arguments.
    pub args: Vec<Value>,
}

impl GroundAtom {
    /// A fact from a predicate and constants.
    pub fn new(predicate: impl Into<String>, args: impl IntoIterator<Item = Value>) -> Self {
        Self {
            predicate: predicate.into(),
            args: args.into_iter().collect(),
        }
    }
}

impl fmt::Display for GroundAtom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let atom = Atom {
            predicate: self.predicate.clone(),
            args: self.args.iter().cloned().map(Term::Const).collect(),
        };
        atom.fmt(f)
    }
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
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
    /// Evaluate on two constants. Ordering across kinds is false.
    pub fn holds(self, a: &Value, b: &Value) -> bool {
        match self {
            Self::Eq => a == b,
            Self::Neq => a != b,
            _ => {
                let ord = match (a, b) {
                    (Value::Int(x), Value::Int(y)) => x.cmp(y),
                    (Value::Str(x), Value::Str(y)) => x.cmp(y),
                    _ => return false,
                };
                match self {
                    Self::Lt => ord == Ordering::Less,
                    Self::Lte => ord != Ordering::Greater,
                    Self::Gt => ord == Ordering::Greater,
                    _ => ord != Ordering::Less,
                }
            }
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Neq => "!=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
        }
    }
}

/// One body literal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Literal {
    /// Positive atom.
    Pos(Atom),
    /// `not atom`.
    Neg(Atom),
    /// `lhs <op> rhs`.
    Cmp(Term, CmpOp, Term),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pos(a) => a.fmt(f),
            Self::Neg(a) => write!(f, "not {a}"),
            Self::Cmp(l, op, r) => write!(f, "{l} {} {r}", op.symbol()),
        }
    }
}

/// `head :- body.`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Clause {
    /// Conclusion.
    pub head: Atom,
    /// Conjunction.
    pub body: Vec<Literal>,
}

impl Clause {
    /// Variables bound by positive body atoms.
    pub fn bound_variables(&self) -> BTreeSet<&str> {
        self.body
            .iter()
            .filter_map(|l| match l {
                Literal::Pos(a) => Some(a),
                _ => None,
            })
            .flat_map(|a| a.args.iter().filter_map(Term::named_var))
            .collect()
    }

    /// First variable that is used but not bound by a positive atom.
    pub fn unsafe_variable(&self) -> Option<&str> {
        let bound = self.bound_variables();
        let mut used: Vec<&str> = self.head.args.iter().filter_map(Term::named_var).collect();
        for l in &self.body {
            match l {
                Literal::Neg(a) => used.extend(a.args.iter().filter_map(Term::named_var)),
                Literal::Cmp(lhs, _, rhs) => {
                    used.extend(lhs.named_var());
                    used.extend(rhs.named_var());
                }
                Literal::Pos(_) => {}
            }
        }
        used.into_iter().find(|v| !bound.contains(v))
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.head.fmt(f)?;
        for (i, l) in self.body.iter().enumerate() {
            f.write_str(if i == 0 { " :- " } else { ", " })?;
            l.fmt(f)?;
        }
        f.write_str(".")
    }
}
