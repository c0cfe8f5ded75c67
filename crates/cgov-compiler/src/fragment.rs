//! # Fragments
//!
//! Each rule compiles to one fragment:
//!
//! ```text
//! # rule deny-contractors @9a41c07e2b55 priority 10
//! # deps: contractor-pred@1f2e3d4c5b6a
//! __excl_deny_contractors_allow_oncall_7c1d09aa {
//!     input.on_call
//! }
//! deny_matches["deny-contractors"] {
//!     is_contractor
//!     not __excl_deny_contractors_allow_oncall_7c1d09aa
//! }
//! ```
//!
//! Decision rules become partial-set members of `allow_matches` or
//! `deny_matches` keyed by rule id, so the runtime's decision carries the
//! matched-rule trace. Custom predicate rules keep their head. Every
//! `overrides` winner contributes an exclusion helper holding the winner's
//! guard.
//!
//! The header pins the rule's content digest, not its registry version: a
//! rule restored by rollback gets a new version with unchanged content, and
//! its fragment must stay byte-identical.

use std::collections::BTreeMap;
use std::fmt::Write;

use cgov_core::lang::{render_rule, CanonicalRule, Expr, Ref, RuleHead, Term, ALLOW};
use cgov_core::{sha256_raw, Rule, RuleId};

/// Partial-set head collecting matched allow rules.
pub const ALLOW_MATCHES: &str = "allow_matches";
/// Partial-set head collecting matched deny rules.
pub const DENY_MATCHES: &str = "deny_matches";

/// Render the fragment for `rule`. `deps` maps each direct dependency to its
/// rule, which supplies the pinned digest and, for override winners, the
/// guard copied into the exclusion helper.
pub fn render_fragment(rule: &Rule, deps: &BTreeMap<&RuleId, &Rule>) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "# rule {} @{} priority {}",
        rule.id,
        rule.content_hash.short(),
        rule.priority
    );
    if deps.is_empty() {
        out.push_str("# deps: -\n");
    } else {
        let pins: Vec<String> = deps
            .iter()
            .map(|(id, dep)| format!("{id}@{}", dep.content_hash.short()))
            .collect();
        let _ = writeln!(out, "# deps: {}", pins.join(", "));
    }

    let mut body = rule.canonical.body.clone();
    for winner in &rule.overrides {
        let Some(winner_rule) = deps.get(winner) else {
            continue;
        };
        let helper = exclusion_name(&rule.id, winner);
        let helper_rule = CanonicalRule {
            is_default: false,
            head: RuleHead {
                name: helper.clone(),
                key: None,
                value: None,
            },
            body: winner_rule.canonical.body.clone(),
        };
        out.push_str(&render_rule(&helper_rule));
        out.push('\n');
        body.push(Expr::term(Term::Ref(Ref::ident(helper))).negate());
    }

    let compiled = if rule.is_decision() {
        let set = if rule.canonical.head.name == ALLOW {
            ALLOW_MATCHES
        } else {
            DENY_MATCHES
        };
        CanonicalRule {
            is_default: false,
            head: RuleHead {
                name: set.to_string(),
                key: Some(Term::string(rule.id.as_str())),
                value: None,
            },
            body,
        }
    } else {
        CanonicalRule {
            body,
            ..rule.canonical.clone()
        }
    };
    out.push_str(&render_rule(&compiled));
    out.push('\n');
    out
}

/// Helper head excluding `loser` wherever `winner`'s guard holds. Rule ids
/// may contain characters that are not valid in identifiers, so the name is
/// sanitized and suffixed with a digest of the exact pair.
pub fn exclusion_name(loser: &RuleId, winner: &RuleId) -> String {
    let pair = format!("{loser}\u{0}{winner}");
    let tag = sha256_raw(pair.as_bytes()).to_hex();
    format!(
        "__excl_{}_{}_{}",
        sanitize(loser.as_str()),
        sanitize(winner.as_str()),
        &tag[..8]
    )
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Rule id named in a fragment's header line, if `line` is one.
pub fn header_rule_id(line: &str) -> Option<&str> {
    line.strip_prefix("# rule ")?.split(' ').next()
}
