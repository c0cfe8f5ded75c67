//! # Dependency Graph
//!
//! `A depends on B` when A consumes a predicate B defines, or when A lists B
//! in `overrides` (A's fragment embeds B's guard). Predicates nobody in the
//! rule set defines are external data and create no edge.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use cgov_core::{Rule, RuleId};

use crate::error::CompileError;

/// Directed dependency graph over a rule set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    /// rule -> rules it depends on.
    deps: BTreeMap<RuleId, BTreeSet<RuleId>>,
    /// rule -> rules depending on it.
    rdeps: BTreeMap<RuleId, BTreeSet<RuleId>>,
}

impl DependencyGraph {
    /// Build the graph for `rules`.
    pub fn build<'a>(rules: impl IntoIterator<Item = &'a Rule>) -> Self {
        let rules: Vec<&Rule> = rules.into_iter().collect();
        let mut definers: BTreeMap<&str, BTreeSet<&RuleId>> = BTreeMap::new();
        for rule in &rules {
            for name in &rule.defines {
                definers.entry(name.as_str()).or_default().insert(&rule.id);
            }
        }
        let known: BTreeSet<&RuleId> = rules.iter().map(|r| &r.id).collect();

        let mut graph = Self::default();
        for rule in &rules {
            graph.rdeps.entry(rule.id.clone()).or_default();
            let mut deps = BTreeSet::new();
            for name in &rule.consumes {
                if let Some(ids) = definers.get(name.as_str()) {
                    deps.extend(ids.iter().filter(|d| **d != &rule.id).map(|d| (*d).clone()));
                }
            }
            deps.extend(rule.overrides.iter().filter(|w| known.contains(w)).cloned());
            graph.deps.insert(rule.id.clone(), deps);
        }
        for (id, deps) in &graph.deps {
            for dep in deps {
                graph.rdeps.entry(dep.clone()).or_default().insert(id.clone());
            }
        }
        graph
    }

    /// Graph from previously recorded direct dependencies.
    pub fn from_edges(deps: BTreeMap<RuleId, BTreeSet<RuleId>>) -> Self {
        let mut rdeps: BTreeMap<RuleId, BTreeSet<RuleId>> =
            deps.keys().map(|id| (id.clone(), BTreeSet::new())).collect();
        for (id, ds) in &deps {
            for dep in ds {
                rdeps.entry(dep.clone()).or_default().insert(id.clone());
            }
        }
        Self { deps, rdeps }
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.deps.len()
    }

    /// True for an empty rule set.
    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }

    /// Direct dependencies of `id`.
    pub fn dependencies(&self, id: &RuleId) -> impl Iterator<Item = &RuleId> {
        self.deps.get(id).into_iter().flatten()
    }

    /// Direct dependents of `id`.
    pub fn dependents(&self, id: &RuleId) -> impl Iterator<Item = &RuleId> {
        self.rdeps.get(id).into_iter().flatten()
    }

    /// All direct edges.
    pub fn edges(&self) -> &BTreeMap<RuleId, BTreeSet<RuleId>> {
        &self.deps
    }

    /// Rules in dependency order (dependencies first), ties broken by id.
    pub fn topological_order(&self) -> Result<Vec<RuleId>, CompileError> {
        let mut pending: BTreeMap<&RuleId, usize> = self
            .deps
            .iter()
            .map(|(id, deps)| (id, deps.iter().filter(|d| self.deps.contains_key(*d)).count()))
            .collect();
        let mut ready: BTreeSet<&RuleId> = pending
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.deps.len());
        while let Some(id) = ready.pop_first() {
            pending.remove(id);
            order.push(id.clone());
            for dependent in self.dependents(id) {
                if let Some(n) = pending.get_mut(dependent) {
                    *n -= 1;
                    if *n == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }
        if pending.is_empty() {
            Ok(order)
        } else {
            let remaining: BTreeSet<&RuleId> = pending.keys().copied().collect();
            Err(CompileError::Cycle {
                rules: self.find_cycle(&remaining),
            })
        }
    }

    /// A cycle among `remaining` (every node in it sits on or upstream of a
    /// cycle), returned as `[a, b, ..., a]`.
    fn find_cycle(&self, remaining: &BTreeSet<&RuleId>) -> Vec<RuleId> {
        // Every remaining node still has an unprocessed dependency inside
        // `remaining`, so walking dependencies must revisit a node.
        let Some(start) = remaining.first() else {
            return Vec::new();
        };
        let mut path: Vec<&RuleId> = vec![start];
        let mut position: BTreeMap<&RuleId, usize> = BTreeMap::from([(*start, 0)]);
        loop {
            let Some(current) = path.last() else {
                return Vec::new();
            };
            let Some(next) = self
                .dependencies(current)
                .find(|d| remaining.contains(d))
            else {
                return Vec::new();
            };
            if let Some(&at) = position.get(next) {
                let mut cycle: Vec<RuleId> = path[at..].iter().map(|id| (*id).clone()).collect();
                cycle.push(next.clone());
                // Report the cycle in the direction of the edges' dependents,
                // starting from its smallest id.
                cycle.pop();
                cycle.reverse();
                let min = cycle
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, id)| *id)
                    .map_or(0, |(i, _)| i);
                cycle.rotate_left(min);
                if let Some(first) = cycle.first().cloned() {
                    cycle.push(first);
                }
                return cycle;
            }
            position.insert(next, path.len());
            path.push(next);
        }
    }

    /// `seeds` plus every rule that transitively depends on one of them.
    pub fn dependents_closure<'a>(
        &self,
        seeds: impl IntoIterator<Item = &'a RuleId>,
    ) -> BTreeSet<RuleId> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<RuleId> = seeds.into_iter().cloned().collect();
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id.clone()) {
                continue;
            }
            queue.extend(self.dependents(&id).filter(|d| !seen.contains(*d)).cloned());
        }
        seen
    }

    /// Union of two graphs' edges.
    pub fn union(&self, other: &DependencyGraph) -> DependencyGraph {
        let mut deps = self.deps.clone();
        for (id, ds) in &other.deps {
            deps.entry(id.clone()).or_default().extend(ds.iter().cloned());
        }
        Self::from_edges(deps)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use cgov_core::lang::parse_rule;
    use cgov_core::SourceFormat;

    pub(crate) fn id(s: &str) -> RuleId {
        RuleId::new(s).unwrap()
    }

    pub(crate) fn rule(name: &str, src: &str) -> Rule {
        Rule::builder(id(name), SourceFormat::Canonical, parse_rule(src).unwrap())
            .build()
            .unwrap()
    }

    fn ids(v: &[RuleId]) -> Vec<&str> {
        v.iter().map(RuleId::as_str).collect()
    }

    #[test]
    fn predicate_and_override_edges() {
        let rules = vec![
            rule("p", "is_contractor {\n    input.category == \"contractor\"\n}"),
            rule("d", "deny {\n    is_contractor\n}"),
            Rule::builder(id("a"), SourceFormat::Canonical, parse_rule("allow {\n    input.vip\n}").unwrap())
                .overrides(id("d"))
                .build()
                .unwrap(),
            rule("x", "deny {\n    external_flag\n}"),
        ];
        let g = DependencyGraph::build(&rules);
        assert_eq!(g.dependencies(&id("d")).collect::<Vec<_>>(), vec![&id("p")]);
        assert_eq!(g.dependencies(&id("a")).collect::<Vec<_>>(), vec![&id("d")]);
        assert_eq!(g.dependencies(&id("x")).count(), 0);
        let order = g.topological_order().unwrap();
        assert_eq!(ids(&order), vec!["p", "d", "a", "x"]);
    }

    #[test]
    fn ties_break_by_id() {
        let rules = vec![
            rule("c", "deny {\n    input.c\n}"),
            rule("a", "deny {\n    input.a\n}"),
            rule("b", "deny {\n    input.b\n}"),
        ];
        let order = DependencyGraph::build(&rules).topological_order().unwrap();
        assert_eq!(ids(&order), vec!["a", "b", "c"]);
    }

    #[test]
    fn cycle_names_every_rule() {
        let rules = vec![
            rule("r1", "p1 {\n    p3\n}"),
            rule("r2", "p2 {\n    p1\n}"),
            rule("r3", "p3 {\n    p2\n}"),
            rule("r4", "deny {\n    p1\n}"),
        ];
        match DependencyGraph::build(&rules).topological_order().unwrap_err() {
            CompileError::Cycle { rules } => {
                assert_eq!(ids(&rules), vec!["r1", "r2", "r3", "r1"]);
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn closure_follows_dependents_transitively() {
        let rules = vec![
            rule("base", "p {\n    input.x\n}"),
            rule("mid", "q {\n    p\n}"),
            rule("top", "deny {\n    q\n}"),
            rule("other", "deny {\n    input.y\n}"),
        ];
        let g = DependencyGraph::build(&rules);
        let closure = g.dependents_closure([&id("base")]);
        assert_eq!(closure, [id("base"), id("mid"), id("top")].into());
    }

    #[test]
    fn self_reference_is_not_an_edge() {
        // A rule consuming its own head name is recursion inside one rule,
        // which consumed_predicates already strips.
        let rules = vec![rule("a", "p {\n    input.x\n}"), rule("b", "p {\n    input.y\n}")];
        let g = DependencyGraph::build(&rules);
        assert!(g.topological_order().is_ok());
    }
}
