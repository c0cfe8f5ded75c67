//! Pairwise conflict detection.

use std::sync::Arc;

use cgov_core::lang::{render_term, CanonicalRule};
use cgov_core::Rule;

use crate::config::ConflictConfig;
use crate::conflict::{Conflict, ConflictKind, ConflictSeverity};
use crate::guard::Guard;
use crate::patch::Patch;
use crate::similarity::{JaccardSimilarity, SimilarityProvider};

/// Detects contradictions, scope overlaps, redundancy and near-duplicates.
pub struct ConflictDetector {
    config: ConflictConfig,
    similarity: Arc<dyn SimilarityProvider>,
}

impl std::fmt::Debug for ConflictDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictDetector")
            .field("config", &self.config)
            .field("similarity", &self.similarity.name())
            .finish()
    }
}

fn conclusion_text(rule: &CanonicalRule) -> String {
    let (name, value) = rule.conclusion();
    match rule.head.value {
        None => name,
        Some(_) => format!("{name} = {}", render_term(&value)),
    }
}

/// Whether two conclusions cannot both be intended: `allow` against `deny`,
/// or one custom head assigned different values.
fn opposite(a: &CanonicalRule, b: &CanonicalRule) -> bool {
    let (ha, va) = a.conclusion();
    let (hb, vb) = b.conclusion();
    if a.is_decision() && b.is_decision() {
        ha != hb
    } else {
        ha == hb && va != vb
    }
}

fn same(a: &CanonicalRule, b: &CanonicalRule) -> bool {
    a.conclusion() == b.conclusion()
}

/// Of two rules, the one to keep: higher priority, then lower id.
fn keeper<'a>(a: &'a Rule, b: &'a Rule) -> (&'a Rule, &'a Rule) {
    if b.priority > a.priority || (b.priority == a.priority && b.id < a.id) {
        (b, a)
    } else {
        (a, b)
    }
}

impl ConflictDetector {
    /// A detector using token-Jaccard similarity.
    pub fn new(config: ConflictConfig) -> Self {
        Self::with_similarity(config, Arc::new(JaccardSimilarity))
    }

    /// A detector using `provider` for near-duplicate checks.
    pub fn with_similarity(config: ConflictConfig, provider: Arc<dyn SimilarityProvider>) -> Self {
        Self {
            config,
            similarity: provider,
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &ConflictConfig {
        &self.config
    }

    /// All conflicts in `rules`, most severe first, then by id. Pairs joined
    /// by an explicit override are already ordered and are skipped.
    pub fn detect<'a>(&self, rules: impl IntoIterator<Item = &'a Rule>) -> Vec<Conflict> {
        let mut rules: Vec<&Rule> = rules.into_iter().collect();
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        let guards: Vec<Guard> = rules.iter().map(|r| Guard::of(&r.canonical)).collect();

        let mut out = Vec::new();
        for i in 0..rules.len() {
            for j in (i + 1)..rules.len() {
                let (a, b) = (rules[i], rules[j]);
                if a.overrides.contains(&b.id) || b.overrides.contains(&a.id) {
                    continue;
                }
                match self.structural(a, &guards[i], b, &guards[j]) {
                    Some(conflict) => out.push(conflict),
                    None => {
                        if let Some(conflict) = self.near_duplicate(a, b) {
                            out.push(conflict);
                        }
                    }
                }
            }
        }
        out.sort_by(|x, y| y.severity.cmp(&x.severity).then_with(|| x.id.cmp(&y.id)));
        tracing::debug!(
            rules = rules.len(),
            conflicts = out.len(),
            blocking = out.iter().filter(|c| c.is_blocking()).count(),
            "conflict detection finished"
        );
        out
    }

    fn structural(&self, a: &Rule, ga: &Guard, b: &Rule, gb: &Guard) -> Option<Conflict> {
        if opposite(&a.canonical, &b.canonical) {
            if !ga.shares_scope(gb) || !ga.overlaps(gb) {
                return None;
            }
            let severity = if a.priority == b.priority {
                ConflictSeverity::Blocking
            } else {
                ConflictSeverity::Warning
            };
            let description = format!(
                "{} ({}, priority {}) and {} ({}, priority {}) can match the same request",
                a.id,
                conclusion_text(&a.canonical),
                a.priority,
                b.id,
                conclusion_text(&b.canonical),
                b.priority
            );
            let mut conflict = Conflict::new(ConflictKind::Contradiction, &[a, b], severity, description);
            if a.priority != b.priority {
                let (winner, loser) = keeper(a, b);
                conflict.patch = Some(Patch::AddOverride {
                    rule: loser.id.clone(),
                    winner: winner.id.clone(),
                });
            }
            return Some(conflict);
        }

        if !same(&a.canonical, &b.canonical) {
            return None;
        }
        if ga.same_as(gb) {
            let (kept, dropped) = keeper(a, b);
            let mut conflict = Conflict::new(
                ConflictKind::Redundancy,
                &[a, b],
                ConflictSeverity::Warning,
                format!("{} and {} have identical guards and conclusions", a.id, b.id),
            );
            conflict.patch = Some(Patch::RetireRule {
                rule: dropped.id.clone(),
                kept: kept.id.clone(),
            });
            return Some(conflict);
        }
        let subsumption = if ga.strictly_within(gb) {
            Some((a, b))
        } else if gb.strictly_within(ga) {
            Some((b, a))
        } else {
            None
        };
        if let Some((general, specific)) = subsumption {
            let mut conflict = Conflict::new(
                ConflictKind::ScopeOverlap {
                    subsumed: Some(specific.id.clone()),
                },
                &[a, b],
                ConflictSeverity::Warning,
                format!("{} is subsumed by the more general {}", specific.id, general.id),
            );
            if specific.priority <= general.priority {
                conflict.patch = Some(Patch::RetireRule {
                    rule: specific.id.clone(),
                    kept: general.id.clone(),
                });
            }
            return Some(conflict);
        }
        if ga.shares_scope(gb) && ga.overlaps(gb) {
            return Some(Conflict::new(
                ConflictKind::ScopeOverlap { subsumed: None },
                &[a, b],
                ConflictSeverity::Informational,
                format!("{} and {} reach the same conclusion over overlapping scope", a.id, b.id),
            ));
        }
        None
    }

    fn near_duplicate(&self, a: &Rule, b: &Rule) -> Option<Conflict> {
        if !self.config.similarity_enabled {
            return None;
        }
        let similarity = self.similarity.similarity(a, b);
        if similarity < self.config.similarity_threshold {
            return None;
        }
        Some(Conflict::new(
            ConflictKind::NearDuplicate { similarity },
            &[a, b],
            ConflictSeverity::Informational,
            format!(
                "{} and {} are {:.0}% similar ({})",
                a.id,
                b.id,
                similarity * 100.0,
                self.similarity.name()
            ),
        ))
    }
}
