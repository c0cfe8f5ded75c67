//! # Compilation Manifests
//!
//! A [`CompilationManifest`] is the hash-based snapshot of a rule set:
//! per-rule content digests, the rule count, the distribution of source
//! formats and an aggregate digest over all of it. Once bound to a compiled
//! bundle (see [`CompilationManifest::bind`]) and written to a store it is
//! never modified.
//!
//! ## Integrity Invariant
//!
//! The aggregate digest is a pure function of the namespace and the sorted
//! `(rule id, content digest)` pairs. [`verify_integrity`] recomputes it and
//! checks the bundle text digest, so any edit to either artifact after
//! compilation is detected.

use std::collections::{BTreeMap, BTreeSet};

use cgov_core::{
    sha256_digest, sha256_raw, BundleVersion, CanonicalBytes, ChangeSet, ContentDigest,
    IntegrityError, Namespace, Rule, RuleId,
};
use serde::{Deserialize, Serialize};

use crate::error::ManifestError;

/// The compiled bundle a manifest describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleRef {
    /// Bundle version number.
    pub version: BundleVersion,
    /// SHA-256 of the bundle text.
    pub digest: ContentDigest,
}

/// Snapshot of a rule set, optionally bound to the bundle compiled from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilationManifest {
    /// Rule-set namespace.
    pub namespace: Namespace,
    /// Content digest of every rule, keyed by identifier.
    pub rule_hashes: BTreeMap<RuleId, ContentDigest>,
    /// Number of rules.
    pub rule_count: usize,
    /// Rule count per source format.
    pub format_distribution: BTreeMap<String, usize>,
    /// Digest over the namespace and all rule digests.
    pub aggregate_digest: ContentDigest,
    /// The compiled bundle, once bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle: Option<BundleRef>,
}

#[derive(Serialize)]
struct AggregateInput<'a> {
    namespace: &'a str,
    rules: BTreeMap<&'a str, String>,
}

fn aggregate_digest(
    namespace: &Namespace,
    rule_hashes: &BTreeMap<RuleId, ContentDigest>,
) -> Result<ContentDigest, ManifestError> {
    let input = AggregateInput {
        namespace: namespace.as_str(),
        rules: rule_hashes
            .iter()
            .map(|(id, digest)| (id.as_str(), digest.to_string()))
            .collect(),
    };
    Ok(sha256_digest(&CanonicalBytes::new(&input)?))
}

impl CompilationManifest {
    /// The manifest of an empty rule set. Diffing against it reports every
    /// rule as added.
    pub fn empty(namespace: Namespace) -> Result<Self, ManifestError> {
        compute_manifest(namespace, std::iter::empty())
    }

    /// Bind the manifest to the bundle compiled from it.
    pub fn bind(mut self, version: BundleVersion, bundle_text: &str) -> Self {
        self.bundle = Some(BundleRef {
            version,
            digest: sha256_raw(bundle_text.as_bytes()),
        });
        self
    }

    /// Version of the bound bundle.
    pub fn version(&self) -> Option<BundleVersion> {
        self.bundle.map(|b| b.version)
    }

    /// True when both manifests describe identical rule content.
    pub fn same_content(&self, other: &CompilationManifest) -> bool {
        self.aggregate_digest == other.aggregate_digest
    }

    /// Digest recorded for `id`.
    pub fn hash_of(&self, id: &RuleId) -> Option<&ContentDigest> {
        self.rule_hashes.get(id)
    }

    /// Recompute the aggregate and counters and compare with the recorded values.
    pub fn verify_self(&self) -> Result<(), IntegrityError> {
        let subject = format!("manifest {}", self.namespace);
        let recomputed = aggregate_digest(&self.namespace, &self.rule_hashes).map_err(|e| {
            IntegrityError {
                subject: subject.clone(),
                expected: self.aggregate_digest.to_string(),
                actual: e.to_string(),
            }
        })?;
        if recomputed != self.aggregate_digest {
            return Err(IntegrityError {
                subject,
                expected: self.aggregate_digest.to_string(),
                actual: recomputed.to_string(),
            });
        }
        let distributed: usize = self.format_distribution.values().sum();
        if self.rule_count != self.rule_hashes.len() || distributed != self.rule_count {
            return Err(IntegrityError {
                subject,
                expected: format!("{} rules", self.rule_hashes.len()),
                actual: format!(
                    "rule_count {} with {} in format distribution",
                    self.rule_count, distributed
                ),
            });
        }
        Ok(())
    }
}

/// Hash a rule set into a manifest. Each rule's own content hash is
/// re-verified first, so a tampered rule cannot enter a manifest.
pub fn compute_manifest<'a>(
    namespace: Namespace,
    rules: impl IntoIterator<Item = &'a Rule>,
) -> Result<CompilationManifest, ManifestError> {
    let mut rule_hashes = BTreeMap::new();
    let mut format_distribution: BTreeMap<String, usize> = BTreeMap::new();
    for rule in rules {
        rule.verify_hash()?;
        if rule_hashes.insert(rule.id.clone(), rule.content_hash).is_none() {
            *format_distribution
                .entry(rule.source_format.as_str().to_string())
                .or_default() += 1;
        }
    }
    let aggregate_digest = aggregate_digest(&namespace, &rule_hashes)?;
    Ok(CompilationManifest {
        namespace,
        rule_count: rule_hashes.len(),
        rule_hashes,
        format_distribution,
        aggregate_digest,
        bundle: None,
    })
}

/// Added, removed and modified rule identifiers between two manifests.
pub fn diff(old: &CompilationManifest, new: &CompilationManifest) -> ChangeSet {
    let mut change = ChangeSet::default();
    if old.same_content(new) {
        return change;
    }
    for (id, digest) in &new.rule_hashes {
        match old.rule_hashes.get(id) {
            None => {
                change.added.insert(id.clone());
            }
            Some(previous) if previous != digest => {
                change.modified.insert(id.clone());
            }
            Some(_) => {}
        }
    }
    change.removed = old
        .rule_hashes
        .keys()
        .filter(|id| !new.rule_hashes.contains_key(*id))
        .cloned()
        .collect();
    change
}

/// What integrity verification needs to know about a compiled bundle.
pub trait BundleArtifact {
    /// Namespace the bundle was compiled for.
    fn namespace(&self) -> &Namespace;
    /// Bundle version.
    fn version(&self) -> BundleVersion;
    /// Deployable bundle text.
    fn text(&self) -> &str;
    /// Aggregate digest of the manifest the bundle claims to be built from.
    fn manifest_digest(&self) -> &ContentDigest;
    /// Identifiers of the rules compiled into the bundle.
    fn rule_ids(&self) -> BTreeSet<RuleId>;
}

/// Confirm that `bundle` is exactly the artifact `manifest` was bound to.
pub fn verify_integrity(
    manifest: &CompilationManifest,
    bundle: &impl BundleArtifact,
) -> Result<(), IntegrityError> {
    manifest.verify_self()?;
    let subject = format!("bundle {}/{}", bundle.namespace(), bundle.version());
    let mismatch = |expected: String, actual: String| IntegrityError {
        subject: subject.clone(),
        expected,
        actual,
    };

    if bundle.namespace() != &manifest.namespace {
        return Err(mismatch(
            format!("namespace {}", manifest.namespace),
            format!("namespace {}", bundle.namespace()),
        ));
    }
    if bundle.manifest_digest() != &manifest.aggregate_digest {
        return Err(mismatch(
            manifest.aggregate_digest.to_string(),
            bundle.manifest_digest().to_string(),
        ));
    }
    let bound = manifest
        .bundle
        .ok_or_else(|| mismatch("a bound bundle".into(), "unbound manifest".into()))?;
    if bound.version != bundle.version() {
        return Err(mismatch(bound.version.to_string(), bundle.version().to_string()));
    }
    let text_digest = sha256_raw(bundle.text().as_bytes());
    if text_digest != bound.digest {
        return Err(mismatch(bound.digest.to_string(), text_digest.to_string()));
    }
    let ids = bundle.rule_ids();
    if ids.len() != manifest.rule_hashes.len() || !manifest.rule_hashes.keys().eq(ids.iter()) {
        return Err(mismatch(
            format!("{} rules from manifest", manifest.rule_count),
            format!("{} rules in bundle", ids.len()),
        ));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use cgov_core::lang::parse_rule;
    use cgov_core::SourceFormat;

    pub(crate) fn rule(id: &str, src: &str) -> Rule {
        Rule::builder(
            RuleId::new(id).unwrap(),
            SourceFormat::Canonical,
            parse_rule(src).unwrap(),
        )
        .build()
        .unwrap()
    }

    fn ns() -> Namespace {
        Namespace::new("ops").unwrap()
    }

    struct FakeBundle {
        namespace: Namespace,
        version: BundleVersion,
        text: String,
        manifest_digest: ContentDigest,
        ids: BTreeSet<RuleId>,
    }

    impl BundleArtifact for FakeBundle {
        fn namespace(&self) -> &Namespace {
            &self.namespace
        }
        fn version(&self) -> BundleVersion {
            self.version
        }
        fn text(&self) -> &str {
            &self.text
        }
        fn manifest_digest(&self) -> &ContentDigest {
            &self.manifest_digest
        }
        fn rule_ids(&self) -> BTreeSet<RuleId> {
            self.ids.clone()
        }
    }

    fn sample() -> Vec<Rule> {
        vec![
            rule("a", "deny {\n    input.x == 1\n}"),
            rule("b", "allow {\n    input.y == 2\n}"),
        ]
    }

    #[test]
    fn identical_content_yields_identical_manifest() {
        let rules = sample();
        let m1 = compute_manifest(ns(), &rules).unwrap();
        let rebuilt: Vec<_> = rules.iter().rev().map(|r| rule(r.id.as_str(), &r.body)).collect();
        let m2 = compute_manifest(ns(), &rebuilt).unwrap();
        assert_eq!(m1, m2);
        assert!(diff(&m1, &m2).is_empty());
        assert_eq!(m1.format_distribution.get("canonical"), Some(&2));
    }

    #[test]
    fn diff_reports_added_removed_modified() {
        let old = compute_manifest(ns(), &sample()).unwrap();
        let new_rules = vec![
            rule("a", "deny {\n    input.x == 2\n}"),
            rule("c", "allow {\n    input.z\n}"),
        ];
        let new = compute_manifest(ns(), &new_rules).unwrap();
        let change = diff(&old, &new);
        assert_eq!(change.modified, [RuleId::new("a").unwrap()].into());
        assert_eq!(change.added, [RuleId::new("c").unwrap()].into());
        assert_eq!(change.removed, [RuleId::new("b").unwrap()].into());
    }

    #[test]
    fn diff_from_empty_adds_everything() {
        let empty = CompilationManifest::empty(ns()).unwrap();
        let full = compute_manifest(ns(), &sample()).unwrap();
        assert_eq!(diff(&empty, &full).added.len(), 2);
    }

    #[test]
    fn tampered_rule_rejected_at_manifest_time() {
        let mut rules = sample();
        rules[0].body.push_str("\n# edited");
        assert!(matches!(
            compute_manifest(ns(), &rules).unwrap_err(),
            ManifestError::Integrity(_)
        ));
    }

    fn bound_pair() -> (CompilationManifest, FakeBundle) {
        let rules = sample();
        let text = "package cgov.ops\n".to_string();
        let manifest = compute_manifest(ns(), &rules).unwrap().bind(BundleVersion(3), &text);
        let bundle = FakeBundle {
            namespace: ns(),
            version: BundleVersion(3),
            manifest_digest: manifest.aggregate_digest,
            ids: rules.iter().map(|r| r.id.clone()).collect(),
            text,
        };
        (manifest, bundle)
    }

    #[test]
    fn verify_accepts_untouched_pair() {
        let (manifest, bundle) = bound_pair();
        verify_integrity(&manifest, &bundle).unwrap();
    }

    #[test]
    fn verify_detects_bundle_text_tampering() {
        let (manifest, mut bundle) = bound_pair();
        bundle.text.push_str("allow { true }\n");
        let err = verify_integrity(&manifest, &bundle).unwrap_err();
        assert!(err.subject.contains("ops/v3"));
    }

    #[test]
    fn verify_detects_manifest_tampering() {
        let (mut manifest, bundle) = bound_pair();
        manifest
            .rule_hashes
            .insert(RuleId::new("a").unwrap(), sha256_raw(b"forged"));
        assert!(verify_integrity(&manifest, &bundle).is_err());
    }

    #[test]
    fn verify_detects_version_and_rule_set_mismatch() {
        let (manifest, mut bundle) = bound_pair();
        bundle.version = BundleVersion(4);
        assert!(verify_integrity(&manifest, &bundle).is_err());
        let (manifest, mut bundle) = bound_pair();
        bundle.ids.insert(RuleId::new("smuggled").unwrap());
        assert!(verify_integrity(&manifest, &bundle).is_err());
    }

    #[test]
    fn unbound_manifest_fails_verification() {
        let (mut manifest, bundle) = bound_pair();
        manifest.bundle = None;
        assert!(verify_integrity(&manifest, &bundle).is_err());
    }
}
