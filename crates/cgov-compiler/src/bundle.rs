//! # Compiled Bundles
//!
//! A [`CompiledBundle`] is the deployable module: a fixed preamble followed
//! by one fragment per rule in dependency order. The text is fully
//! determined by the fragments and their order.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use cgov_core::lang::parse_module;
use cgov_core::{sha256_raw, BundleVersion, ContentDigest, IntegrityError, Namespace, RuleId};
use cgov_manifest::BundleArtifact;
use serde::{Deserialize, Serialize};

use crate::fragment::{ALLOW_MATCHES, DENY_MATCHES};

/// How a bundle was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CompileMode {
    /// Every fragment was rendered.
    Full,
    /// Only affected fragments were rendered and spliced in.
    Partial {
        /// Number of fragments rendered.
        recompiled: usize,
    },
}

impl CompileMode {
    /// Short label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            CompileMode::Full => "full",
            CompileMode::Partial { .. } => "partial",
        }
    }
}

/// A deployable, versioned compilation of a namespace's rule set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledBundle {
    /// Namespace compiled.
    pub namespace: Namespace,
    /// Bundle version.
    pub version: BundleVersion,
    /// Aggregate digest of the manifest this bundle was built from.
    pub manifest_digest: ContentDigest,
    /// Rendered fragment per rule.
    pub fragments: BTreeMap<RuleId, String>,
    /// Fragment order in `text`.
    pub order: Vec<RuleId>,
    /// Direct dependencies per rule at compile time.
    pub dependencies: BTreeMap<RuleId, BTreeSet<RuleId>>,
    /// The full bundle text.
    pub text: String,
    /// SHA-256 of `text`.
    pub digest: ContentDigest,
    /// Priority weight per rule.
    pub priorities: BTreeMap<RuleId, u32>,
    /// Category per rule, where declared.
    pub categories: BTreeMap<RuleId, String>,
    /// Full or partial.
    pub mode: CompileMode,
    /// Predicted compile time, microseconds.
    pub estimated_micros: u64,
    /// Measured compile time, microseconds.
    pub actual_micros: u64,
}

/// The fixed module preamble for `namespace`.
pub fn preamble(namespace: &Namespace) -> String {
    format!(
        "package {pkg}\n\
         \n\
         default allow = false\n\
         \n\
         allow {{\n    count({DENY_MATCHES}) == 0\n    count({ALLOW_MATCHES}) > 0\n}}\n\
         \n\
         decision = {{\"allow\": allow, \"{ALLOW_MATCHES}\": {ALLOW_MATCHES}, \"{DENY_MATCHES}\": {DENY_MATCHES}}}\n",
        pkg = namespace.package_path(),
    )
}

/// Preamble plus fragments in `order`, separated by blank lines.
pub fn assemble(
    namespace: &Namespace,
    order: &[RuleId],
    fragments: &BTreeMap<RuleId, String>,
) -> String {
    let mut text = preamble(namespace);
    for id in order {
        if let Some(fragment) = fragments.get(id) {
            text.push('\n');
            text.push_str(fragment);
        }
    }
    text
}

impl CompiledBundle {
    /// Predicted compile time.
    pub fn estimated(&self) -> Duration {
        Duration::from_micros(self.estimated_micros)
    }

    /// Measured compile time.
    pub fn actual(&self) -> Duration {
        Duration::from_micros(self.actual_micros)
    }

    /// Number of rules compiled in.
    pub fn rule_count(&self) -> usize {
        self.order.len()
    }

    /// Priority of `id`, zero when unknown.
    pub fn priority_of(&self, id: &str) -> u32 {
        RuleId::new(id)
            .ok()
            .and_then(|id| self.priorities.get(&id).copied())
            .unwrap_or(0)
    }

    /// Category of `id`.
    pub fn category_of(&self, id: &str) -> Option<&str> {
        RuleId::new(id)
            .ok()
            .and_then(|id| self.categories.get(&id).map(String::as_str))
    }

    /// Check that the text is exactly the assembly of the fragments, that
    /// its digest matches and that it parses.
    pub fn verify_assembly(&self) -> Result<(), IntegrityError> {
        let subject = format!("bundle {}/{}", self.namespace, self.version);
        let order_ids: BTreeSet<&RuleId> = self.order.iter().collect();
        if order_ids.len() != self.order.len() || !self.fragments.keys().eq(order_ids.into_iter()) {
            return Err(IntegrityError {
                subject,
                expected: format!("{} ordered fragments", self.fragments.len()),
                actual: format!("{} order entries", self.order.len()),
            });
        }
        let expected = assemble(&self.namespace, &self.order, &self.fragments);
        if expected != self.text {
            return Err(IntegrityError {
                subject,
                expected: sha256_raw(expected.as_bytes()).to_string(),
                actual: sha256_raw(self.text.as_bytes()).to_string(),
            });
        }
        let digest = sha256_raw(self.text.as_bytes());
        if digest != self.digest {
            return Err(IntegrityError {
                subject,
                expected: self.digest.to_string(),
                actual: digest.to_string(),
            });
        }
        parse_module(&self.text).map_err(|e| IntegrityError {
            subject,
            expected: "parseable bundle text".into(),
            actual: e.to_string(),
        })?;
        Ok(())
    }
}

impl BundleArtifact for CompiledBundle {
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
        self.order.iter().cloned().collect()
    }
}
