//! Stratified forward chaining.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value as Json};

use crate::base::FactBase;
use crate::config::FactsConfig;
use crate::error::FactError;
use crate::parser::{parse_program, Program};
use crate::term::{Atom, Clause, GroundAtom, Literal, Term, Value};

/// Variable assignment satisfying a goal.
pub type Binding = BTreeMap<String, Value>;

/// Rules and base facts, ready to answer queries.
#[derive(Debug, Clone)]
pub struct FactEvaluator {
    config: FactsConfig,
    base: FactBase,
    /// Rules grouped by stratum, lowest first.
    strata: Vec<Vec<Clause>>,
}

impl FactEvaluator {
    /// Build from a parsed program.
    pub fn new(config: FactsConfig, program: Program) -> Result<Self, FactError> {
        let strata = stratify(&program.rules)?;
        Ok(Self {
            config,
            base: program.facts.into_iter().collect(),
            strata,
        })
    }

    /// Parse and build.
    pub fn from_source(config: FactsConfig, src: &str) -> Result<Self, FactError> {
        Self::new(config, parse_program(src)?)
    }

    /// An evaluator with no rules and no facts.
    pub fn empty() -> Self {
        Self {
            config: FactsConfig::default(),
            base: FactBase::new(),
            strata: Vec::new(),
        }
    }

    /// Number of rules.
    pub fn rule_count(&self) -> usize {
        self.strata.iter().map(Vec::len).sum()
    }

    /// Base facts plus `facts` plus everything derivable from them.
    pub fn saturate(&self, facts: &FactBase) -> Result<FactBase, FactError> {
        let mut all = self.base.clone();
        for fact in facts.iter() {
            all.insert(fact);
        }
        for rules in &self.strata {
            let mut rounds = 0;
            loop {
                rounds += 1;
                if rounds > self.config.max_rounds {
                    return Err(FactError::LimitExceeded {
                        limit: self.config.max_rounds,
                        what: "rounds",
                    });
                }
                let mut fresh = Vec::new();
                for rule in rules {
                    for binding in solve(&rule.body, &all) {
                        let fact = instantiate(&rule.head, &binding);
                        if !all.contains(&fact.predicate, &fact.args) {
                            fresh.push(fact);
                        }
                    }
                }
                let mut grew = false;
                for fact in fresh {
                    grew |= all.insert(fact);
                    if all.len() > self.config.max_facts {
                        return Err(FactError::LimitExceeded {
                            limit: self.config.max_facts,
                            what: "facts",
                        });
                    }
                }
                if !grew {
                    break;
                }
            }
        }
        Ok(all)
    }

    /// Every binding of `goal`'s variables that holds. A goal without
    /// variables yields one empty binding when it holds. No proof yields an
    /// empty list.
    pub fn query(&self, goal: &Atom, facts: &FactBase) -> Result<Vec<Binding>, FactError> {
        let all = self.saturate(facts)?;
        Ok(answer(goal, &all))
    }

    /// Derive request context: for each `(name, goal)`, `true`/`false` for
    /// ground goals, otherwise the list of bindings.
    pub fn derive_context(&self, input: &Json, goals: &[(String, Atom)]) -> Result<Json, FactError> {
        let mut facts = FactBase::new();
        facts.extend_from_input(input);
        let all = self.saturate(&facts)?;
        let mut out = Map::new();
        for (name, goal) in goals {
            let answers = answer(goal, &all);
            let value = if goal.variables().is_empty() {
                Json::Bool(!answers.is_empty())
            } else {
                Json::Array(
                    answers
                        .into_iter()
                        .map(|b| Json::Object(b.into_iter().map(|(k, v)| (k, v.to_json())).collect()))
                        .collect(),
                )
            };
            out.insert(name.clone(), value);
        }
        tracing::debug!(goals = goals.len(), derived = all.len(), "context facts derived");
        Ok(Json::Object(out))
    }
}

fn answer(goal: &Atom, facts: &FactBase) -> Vec<Binding> {
    let mut out: BTreeSet<Binding> = BTreeSet::new();
    for row in facts.rows(&goal.predicate) {
        if let Some(b) = unify(&goal.args, row, &Binding::new()) {
            out.insert(b);
        }
    }
    out.into_iter().collect()
}

/// Extend `binding` so that `pattern` matches `row`.
fn unify(pattern: &[Term], row: &[Value], binding: &Binding) -> Option<Binding> {
    if pattern.len() != row.len() {
        return None;
    }
    let mut b = binding.clone();
    for (t, v) in pattern.iter().zip(row) {
        match t {
            Term::Const(c) if c != v => return None,
            Term::Const(_) => {}
            Term::Var(name) if name == "_" => {}
            Term::Var(name) => match b.get(name) {
                Some(bound) if bound != v => return None,
                Some(_) => {}
                None => {
                    b.insert(name.clone(), v.clone());
                }
            },
        }
    }
    Some(b)
}

fn resolve<'a>(t: &'a Term, b: &'a Binding) -> Option<&'a Value> {
    match t {
        Term::Const(c) => Some(c),
        Term::Var(v) => b.get(v),
    }
}

/// Bindings satisfying a rule body: positive atoms joined left to right,
/// then comparisons and negations checked on the complete binding.
fn solve(body: &[Literal], facts: &FactBase) -> Vec<Binding> {
    let mut partial = vec![Binding::new()];
    for lit in body {
        let Literal::Pos(atom) = lit else { continue };
        let mut next = Vec::new();
        for b in &partial {
            for row in facts.rows(&atom.predicate) {
                if let Some(extended) = unify(&atom.args, row, b) {
                    next.push(extended);
                }
            }
        }
        partial = next;
        if partial.is_empty() {
            return partial;
        }
    }
    partial.retain(|b| {
        body.iter().all(|lit| match lit {
            Literal::Pos(_) => true,
            Literal::Cmp(l, op, r) => match (resolve(l, b), resolve(r, b)) {
                (Some(x), Some(y)) => op.holds(x, y),
                _ => false,
            },
            Literal::Neg(atom) => !facts.rows(&atom.predicate).any(|row| unify(&atom.args, row, b).is_some()),
        })
    });
    partial
}

fn instantiate(head: &Atom, b: &Binding) -> GroundAtom {
    GroundAtom {
        predicate: head.predicate.clone(),
        args: head
            .args
            .iter()
            .filter_map(|t| resolve(t, b).cloned())
            .collect(),
    }
}

/// Group rules so every negated predicate is complete before it is read.
fn stratify(rules: &[Clause]) -> Result<Vec<Vec<Clause>>, FactError> {
    let heads: BTreeSet<&str> = rules.iter().map(|r| r.head.predicate.as_str()).collect();
    let mut level: BTreeMap<&str, usize> = heads.iter().map(|h| (*h, 0)).collect();
    let limit = heads.len();
    loop {
        let mut changed = false;
        for rule in rules {
            let head = rule.head.predicate.as_str();
            let mut need = level[head];
            for lit in &rule.body {
                let (atom, step) = match lit {
                    Literal::Pos(a) => (a, 0),
                    Literal::Neg(a) => (a, 1),
                    Literal::Cmp(..) => continue,
                };
                if let Some(l) = level.get(atom.predicate.as_str()) {
                    need = need.max(l + step);
                }
            }
            if need > limit {
                return Err(FactError::Unstratifiable(head.to_string()));
            }
            if need != level[head] {
                level.insert(head, need);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    let depth = level.values().copied().max().map_or(0, |m| m + 1);
    let mut strata = vec![Vec::new(); depth];
    for rule in rules {
        strata[level[rule.head.predicate.as_str()]].push(rule.clone());
    }
    Ok(strata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_goal;
    use serde_json::json;

    const PROGRAM: &str = r#"
        employee(alice).
        employee(bob).
        contractor(carol).
        shift(alice, 23).
        shift(bob, 9).
        shift(carol, 22).
        manages(alice, bob).
        manages(bob, dave).

        night_worker(X) :- shift(X, H), H >= 22.
        reports_to(X, Y) :- manages(Y, X).
        reports_to(X, Z) :- manages(Y, X), reports_to(Y, Z).
        restricted(X) :- contractor(X), not cleared(X).
        cleared(X) :- employee(X).
    "#;

    fn eval() -> FactEvaluator {
        FactEvaluator::from_source(FactsConfig::default(), PROGRAM).unwrap()
    }

    fn q(goal: &str) -> Vec<Binding> {
        eval().query(&parse_goal(goal).unwrap(), &FactBase::new()).unwrap()
    }

    #[test]
    fn comparisons_filter_bindings() {
        let names: Vec<_> = q("night_worker(X)").into_iter().map(|b| b["X"].clone()).collect();
        assert_eq!(names, vec![Value::str("alice"), Value::str("carol")]);
    }

    #[test]
    fn recursion_reaches_fixpoint() {
        let bosses: Vec<_> = q("reports_to(dave, Y)").into_iter().map(|b| b["Y"].clone()).collect();
        assert_eq!(bosses, vec![Value::str("alice"), Value::str("bob")]);
    }

    #[test]
    fn negation_reads_completed_stratum() {
        let r = q("restricted(X)");
        assert_eq!(r.len(), 1);
        assert_eq!(r[0]["X"], Value::str("carol"));
    }

    #[test]
    fn no_proof_is_empty_not_error() {
        assert!(q("restricted(alice)").is_empty());
        assert!(q("unknown_predicate(X)").is_empty());
        assert_eq!(q("employee(alice)"), vec![Binding::new()]);
    }

    #[test]
    fn negation_cycle_rejected() {
        let err = FactEvaluator::from_source(FactsConfig::default(), "p(X) :- q(X), not p(X).\nq(a).").unwrap_err();
        assert!(matches!(err, FactError::Unstratifiable(_)));
    }

    #[test]
    fn fact_bound_is_enforced() {
        let config = FactsConfig {
            max_facts: 3,
            ..FactsConfig::default()
        };
        let err = FactEvaluator::from_source(config, "n(1).\nn(2).\nm(X) :- n(X).")
            .unwrap()
            .query(&parse_goal("m(X)").unwrap(), &FactBase::new())
            .unwrap_err();
        assert!(matches!(err, FactError::LimitExceeded { what: "facts", .. }));
    }

    #[test]
    fn derives_request_context() {
        let ev = FactEvaluator::from_source(
            FactsConfig::default(),
            r#"
            night_contractor :- input("requester.category", "contractor"), input("request.hour", H), H >= 22.
            role(R) :- input("requester.roles", R).
            "#,
        )
        .unwrap();
        let ctx = ev
            .derive_context(
                &json!({"requester": {"category": "contractor", "roles": ["dev"]}, "request": {"hour": 23}}),
                &[
                    ("night_contractor".into(), parse_goal("night_contractor").unwrap()),
                    ("roles".into(), parse_goal("role(R)").unwrap()),
                ],
            )
            .unwrap();
        assert_eq!(ctx, json!({"night_contractor": true, "roles": [{"R": "dev"}]}));
    }

    #[test]
    fn repeated_variables_must_agree() {
        let ev = FactEvaluator::from_source(FactsConfig::default(), "pair(a, a).\npair(a, b).").unwrap();
        let r = ev.query(&parse_goal("pair(X, X)").unwrap(), &FactBase::new()).unwrap();
        assert_eq!(r.len(), 1);
    }
}
