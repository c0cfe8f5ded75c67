//! Guard analysis over rule bodies.
//!
//! A guard is the conjunction of a rule's body expressions. Expressions of
//! the form `ref <cmp> literal` (either side), bare `ref` and `not ref`
//! become constraints on that ref; everything else is kept only as text for
//! identity and subset checks. Two guards are disjoint when some shared ref
//! carries constraints that cannot hold together.

use std::collections::{BTreeMap, BTreeSet};

use cgov_core::lang::{render_expr, render_ref, CanonicalRule, CmpOp, Expr, Scalar, Term};

/// A constraint on one ref.
#[derive(Debug, Clone, PartialEq)]
enum Constraint {
    /// `ref <op> literal`.
    Compare { op: CmpOp, value: Scalar },
    /// Bare `ref`: defined and not `false`.
    Truthy,
    /// `not ref`: undefined or `false`.
    Falsy,
}

/// The analysable shape of a rule body.
#[derive(Debug, Clone, Default)]
pub struct Guard {
    exprs: BTreeSet<String>,
    reads: BTreeSet<String>,
    constraints: BTreeMap<String, Vec<Constraint>>,
}

impl Guard {
    /// Guard of `rule`.
    pub fn of(rule: &CanonicalRule) -> Self {
        let mut guard = Self::default();
        for expr in &rule.body {
            guard.exprs.insert(render_expr(expr));
            let operands = std::iter::once(&expr.lhs).chain(expr.cmp.as_ref().map(|(_, rhs)| rhs));
            guard.reads.extend(operands.filter_map(Term::as_ref).map(render_ref));
            if let Some((key, c)) = constraint(expr) {
                guard.constraints.entry(key).or_default().push(c);
            }
        }
        guard
    }

    /// Rendered body expressions.
    pub fn expressions(&self) -> &BTreeSet<String> {
        &self.exprs
    }

    /// Refs and predicates read by top-level operands.
    pub fn reads(&self) -> &BTreeSet<String> {
        &self.reads
    }

    /// Whether both guards read at least one common ref or predicate.
    pub fn shares_scope(&self, other: &Guard) -> bool {
        !self.reads.is_disjoint(&other.reads)
    }

    /// Same set of expressions.
    pub fn same_as(&self, other: &Guard) -> bool {
        self.exprs == other.exprs
    }

    /// Every expression of `self` appears in `other`, and `other` has more.
    /// `other` is then more specific: whenever it holds, `self` holds.
    pub fn strictly_within(&self, other: &Guard) -> bool {
        self.exprs.len() < other.exprs.len() && self.exprs.is_subset(&other.exprs)
    }

    /// Whether both guards can hold for the same input. Undecidable cases
    /// count as overlapping.
    pub fn overlaps(&self, other: &Guard) -> bool {
        for (key, mine) in &self.constraints {
            if let Some(theirs) = other.constraints.get(key) {
                let combined: Vec<&Constraint> = mine.iter().chain(theirs.iter()).collect();
                if !satisfiable(&combined) {
                    return false;
                }
            }
        }
        true
    }
}

fn negate_op(op: CmpOp) -> CmpOp {
    match op {
        CmpOp::Eq => CmpOp::Neq,
        CmpOp::Neq => CmpOp::Eq,
        CmpOp::Lt => CmpOp::Gte,
        CmpOp::Lte => CmpOp::Gt,
        CmpOp::Gt => CmpOp::Lte,
        CmpOp::Gte => CmpOp::Lt,
    }
}

fn constraint(expr: &Expr) -> Option<(String, Constraint)> {
    let (key, c) = match (&expr.lhs, &expr.cmp) {
        (Term::Ref(r), None) => {
            let c = if expr.negated { Constraint::Falsy } else { Constraint::Truthy };
            (render_ref(r), c)
        }
        (Term::Ref(r), Some((op, Term::Scalar(s)))) => (render_ref(r), compare(*op, s, expr.negated)),
        (Term::Scalar(s), Some((op, Term::Ref(r)))) => (render_ref(r), compare(op.flipped(), s, expr.negated)),
        _ => return None,
    };
    // Iterated refs (`roles[_]`) hold for any element; no constraint algebra applies.
    if key.contains("[_]") {
        return None;
    }
    Some((key, c))
}

fn compare(op: CmpOp, value: &Scalar, negated: bool) -> Constraint {
    Constraint::Compare {
        op: if negated { negate_op(op) } else { op },
        value: value.clone(),
    }
}

fn same_literal(a: &Scalar, b: &Scalar) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

#[derive(Clone, Copy)]
struct Bound {
    value: f64,
    inclusive: bool,
}

fn satisfiable(constraints: &[&Constraint]) -> bool {
    let truthy = constraints.iter().any(|c| matches!(c, Constraint::Truthy));
    let falsy = constraints.iter().any(|c| matches!(c, Constraint::Falsy));
    if truthy && falsy {
        return false;
    }
    let compares: Vec<(CmpOp, &Scalar)> = constraints
        .iter()
        .filter_map(|c| match c {
            Constraint::Compare { op, value } => Some((*op, value)),
            _ => None,
        })
        .collect();

    let mut equal: Option<&Scalar> = None;
    for (_, value) in compares.iter().filter(|(op, _)| *op == CmpOp::Eq) {
        match equal {
            Some(e) if !same_literal(e, value) => return false,
            _ => equal = Some(*value),
        }
    }
    if let Some(e) = equal {
        if compares
            .iter()
            .any(|(op, value)| *op == CmpOp::Neq && same_literal(e, value))
        {
            return false;
        }
        let is_false = *e == Scalar::Bool(false);
        if (truthy && is_false) || (falsy && !is_false) {
            return false;
        }
    }

    let mut lower: Option<Bound> = None;
    let mut upper: Option<Bound> = None;
    for (op, value) in &compares {
        let Some(v) = value.as_f64() else { continue };
        match op {
            CmpOp::Gt | CmpOp::Gte => {
                let b = Bound { value: v, inclusive: *op == CmpOp::Gte };
                lower = Some(match lower {
                    Some(l) if l.value > v || (l.value == v && !l.inclusive) => l,
                    _ => b,
                });
            }
            CmpOp::Lt | CmpOp::Lte => {
                let b = Bound { value: v, inclusive: *op == CmpOp::Lte };
                upper = Some(match upper {
                    Some(u) if u.value < v || (u.value == v && !u.inclusive) => u,
                    _ => b,
                });
            }
            _ => {}
        }
    }
    if let (Some(l), Some(u)) = (lower, upper) {
        if l.value > u.value || (l.value == u.value && !(l.inclusive && u.inclusive)) {
            return false;
        }
    }
    if let Some(n) = equal.and_then(Scalar::as_f64) {
        if let Some(l) = lower {
            if n < l.value || (n == l.value && !l.inclusive) {
                return false;
            }
        }
        if let Some(u) = upper {
            if n > u.value || (n == u.value && !u.inclusive) {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgov_core::lang::parse_rule;

    fn guard(src: &str) -> Guard {
        Guard::of(&parse_rule(src).unwrap())
    }

    #[test]
    fn different_equalities_are_disjoint() {
        let a = guard("allow {\n    input.category == \"employee\"\n}");
        let b = guard("deny {\n    input.category == \"contractor\"\n}");
        assert!(!a.overlaps(&b));
    }

    #[test]
    fn equality_and_negation_are_disjoint() {
        let a = guard("allow {\n    input.category == \"contractor\"\n}");
        let b = guard("deny {\n    input.category != \"contractor\"\n}");
        assert!(!a.overlaps(&b));
        let c = guard("deny {\n    not on_call\n}");
        let d = guard("allow {\n    on_call\n}");
        assert!(!c.overlaps(&d));
    }

    #[test]
    fn numeric_ranges() {
        let night = guard("deny {\n    input.hour >= 22\n}");
        let day = guard("allow {\n    input.hour < 22\n}");
        let late = guard("allow {\n    23 <= input.hour\n}");
        assert!(!night.overlaps(&day));
        assert!(night.overlaps(&late));
        let exact = guard("allow {\n    input.hour == 21\n}");
        assert!(!exact.overlaps(&night));
        assert!(exact.overlaps(&day));
    }

    #[test]
    fn unrelated_refs_overlap() {
        let a = guard("allow {\n    input.team == \"sre\"\n}");
        let b = guard("deny {\n    input.category == \"contractor\"\n}");
        assert!(a.overlaps(&b));
        let iter = guard("deny {\n    input.roles[_] == \"a\"\n}");
        let iter2 = guard("allow {\n    input.roles[_] == \"b\"\n}");
        assert!(iter.overlaps(&iter2));
    }

    #[test]
    fn identity_and_subsumption() {
        let general = guard("deny {\n    input.category == \"contractor\"\n}");
        let specific = guard("deny {\n    input.category == \"contractor\"\n    input.hour >= 22\n}");
        assert!(general.strictly_within(&specific));
        assert!(!specific.strictly_within(&general));
        assert!(general.same_as(&guard("allow {\n    input.category == \"contractor\"\n}")));
    }

    #[test]
    fn shared_scope_by_reads() {
        let a = guard("allow {\n    input.team == \"sre\"\n    on_call\n}");
        let b = guard("deny {\n    not on_call\n}");
        let c = guard("deny {\n    input.category == \"x\"\n}");
        assert!(a.shares_scope(&b));
        assert!(!a.shares_scope(&c));
    }

    #[test]
    fn truthiness_overlaps_any_non_false_value() {
        let bare = guard("deny {\n    input.level\n}");
        assert!(bare.overlaps(&guard("allow {\n    input.level == 5\n}")));
        assert!(bare.overlaps(&guard("allow {\n    input.level == true\n}")));
        assert!(!bare.overlaps(&guard("allow {\n    input.level == false\n}")));
        assert!(!bare.overlaps(&guard("allow {\n    not input.level\n}")));
        let absent = guard("deny {\n    not input.level\n}");
        assert!(absent.overlaps(&guard("allow {\n    input.level == false\n}")));
        assert!(!absent.overlaps(&guard("allow {\n    input.level == 5\n}")));
    }

    #[test]
    fn numbers_compare_by_value() {
        let a = guard("allow {\n    input.level == 1\n}");
        let b = guard("deny {\n    input.level == 1.0\n}");
        assert!(a.overlaps(&b));
    }

    fn holds(op: &str, x: i64, n: i64) -> bool {
        match op {
            ">" => x > n,
            ">=" => x >= n,
            "<" => x < n,
            "<=" => x <= n,
            "==" => x == n,
            _ => x != n,
        }
    }

    fn hour_rule(head: &str, constraints: &[(&str, i64)]) -> Guard {
        let body: String = constraints
            .iter()
            .map(|(op, n)| format!("    input.hour {op} {n}\n"))
            .collect();
        guard(&format!("{head} {{\n{body}}}"))
    }

    fn op() -> impl proptest::strategy::Strategy<Value = &'static str> {
        proptest::sample::select(vec![">", ">=", "<", "<=", "==", "!="])
    }

    proptest::proptest! {
        #[test]
        fn overlap_is_symmetric_and_never_misses_a_witness(
            a in proptest::collection::vec((op(), 0i64..24), 1..3),
            b in proptest::collection::vec((op(), 0i64..24), 1..3),
        ) {
            let ga = hour_rule("allow", &a);
            let gb = hour_rule("deny", &b);
            proptest::prop_assert_eq!(ga.overlaps(&gb), gb.overlaps(&ga));
            let witness = (-1i64..=25).any(|x| a.iter().chain(b.iter()).all(|(op, n)| holds(op, x, *n)));
            if witness {
                proptest::prop_assert!(ga.overlaps(&gb));
            }
        }
    }
}
