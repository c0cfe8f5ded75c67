//! Fact storage.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value as Json;

use crate::term::{GroundAtom, Value};

/// Predicate under which request input is exposed.
pub const INPUT_PREDICATE: &str = "input";

/// A set of ground facts, indexed by predicate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FactBase {
    facts: BTreeMap<String, BTreeSet<Vec<Value>>>,
    len: usize,
}

impl FactBase {
    /// An empty base.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fact. Returns whether it was new.
    pub fn insert(&mut self, fact: GroundAtom) -> bool {
        let added = self.facts.entry(fact.predicate).or_default().insert(fact.args);
        if added {
            self.len += 1;
        }
        added
    }

    /// Whether `predicate(args)` holds.
    pub fn contains(&self, predicate: &str, args: &[Value]) -> bool {
        self.facts.get(predicate).is_some_and(|rows| rows.contains(args))
    }

    /// Argument rows of `predicate`.
    pub fn rows(&self, predicate: &str) -> impl Iterator<Item = &Vec<Value>> + '_ {
        self.facts.get(predicate).into_iter().flatten()
    }

    /// Total number of facts.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the base is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Every fact, ordered by predicate then arguments.
    pub fn iter(&self) -> impl Iterator<Item = GroundAtom> + '_ {
        self.facts.iter().flat_map(|(p, rows)| {
            rows.iter().map(move |args| GroundAtom {
                predicate: p.clone(),
                args: args.clone(),
            })
        })
    }

    /// Add `input(path, value)` for every scalar leaf of a JSON document.
    /// Array elements share their array's path. Nulls and non-integer
    /// numbers are skipped.
    pub fn extend_from_input(&mut self, input: &Json) -> usize {
        let mut added = 0;
        let mut stack: Vec<(String, &Json)> = vec![(String::new(), input)];
        while let Some((path, value)) = stack.pop() {
            match value {
                Json::Object(map) => {
                    for (k, v) in map {
                        let child = if path.is_empty() { k.clone() } else { format!("{path}.{k}") };
                        stack.push((child, v));
                    }
                }
                Json::Array(items) => stack.extend(items.iter().map(|v| (path.clone(), v))),
                scalar => {
                    let Some(v) = scalar_value(scalar) else { continue };
                    if path.is_empty() {
                        continue;
                    }
                    if self.insert(GroundAtom::new(INPUT_PREDICATE, [Value::Str(path), v])) {
                        added += 1;
                    }
                }
            }
        }
        added
    }
}

impl FromIterator<GroundAtom> for FactBase {
    fn from_iter<I: IntoIterator<Item = GroundAtom>>(iter: I) -> Self {
        let mut base = Self::new();
        for fact in iter {
            base.insert(fact);
        }
        base
    }
}

fn scalar_value(v: &Json) -> Option<Value> {
    match v {
        Json::Bool(b) => Some(Value::Bool(*b)),
        Json::Number(n) => n.as_i64().map(Value::Int),
        Json::String(s) => Some(Value::Str(s.clone())),
        _ => None,
    }
}
