//! Pluggable semantic-similarity capability.

use std::collections::BTreeSet;

use cgov_core::lang::render_rule;
use cgov_core::Rule;

/// Scores how alike two rules are, in `[0, 1]`. Implementations may call an
/// external model; the default is a local token comparison.
pub trait SimilarityProvider: Send + Sync {
    /// Provider name, for logs.
    fn name(&self) -> &str;

    /// Similarity of `a` and `b`.
    fn similarity(&self, a: &Rule, b: &Rule) -> f64;
}

/// Jaccard index over the token sets of the rendered rule bodies. Heads are
/// ignored so an allow and a deny with the same body score 1.0.
#[derive(Debug, Clone, Copy, Default)]
pub struct JaccardSimilarity;

fn tokens(rule: &Rule) -> BTreeSet<String> {
    let rendered = render_rule(&rule.canonical);
    let body = rendered.split_once('{').map_or("", |(_, b)| b);
    body.split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '.' || c == '"'))
        .filter(|t| !t.is_empty())
        .map(|t| t.trim_matches('"').to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

impl SimilarityProvider for JaccardSimilarity {
    fn name(&self) -> &str {
        "jaccard"
    }

    fn similarity(&self, a: &Rule, b: &Rule) -> f64 {
        let ta = tokens(a);
        let tb = tokens(b);
        let union = ta.union(&tb).count();
        if union == 0 {
            return 0.0;
        }
        ta.intersection(&tb).count() as f64 / union as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgov_core::lang::parse_rule;
    use cgov_core::{RuleId, SourceFormat};

    fn rule(src: &str) -> Rule {
        Rule::builder(RuleId::new("r").unwrap(), SourceFormat::Canonical, parse_rule(src).unwrap())
            .build()
            .unwrap()
    }

    #[test]
    fn identical_bodies_score_one() {
        let a = rule("deny {\n    input.category == \"contractor\"\n}");
        let b = rule("allow {\n    input.category == \"contractor\"\n}");
        assert_eq!(JaccardSimilarity.similarity(&a, &b), 1.0);
    }

    #[test]
    fn disjoint_bodies_score_zero() {
        let a = rule("deny {\n    input.a == 1\n}");
        let b = rule("deny {\n    input.b == 2\n}");
        assert_eq!(JaccardSimilarity.similarity(&a, &b), 0.0);
    }

    #[test]
    fn partial_overlap() {
        let a = rule("deny {\n    input.category == \"contractor\"\n    input.hour >= 22\n}");
        let b = rule("deny {\n    input.category == \"contractor\"\n    input.hour >= 23\n}");
        let s = JaccardSimilarity.similarity(&a, &b);
        assert!(s > 0.5 && s < 1.0, "{s}");
    }
}
