//! # Version Stores
//!
//! Manifests and compiled bundles are retrievable by version so a namespace
//! can be rolled back. Every read re-verifies the bundle against its
//! manifest; a record that fails verification is an integrity error, never
//! served.
//!
//! ## Retention
//!
//! [`VersionStore::prune`] keeps the current active version, the newest
//! `retain` versions that were ever activated (never fewer than
//! [`MIN_RETAINED_VERSIONS`], so the previous active bundle always survives)
//! and every version newer than the active one that has not been activated
//! yet.

mod fs;
mod memory;

use std::collections::BTreeSet;

use cgov_core::{BundleStatus, BundleVersion, Namespace, Rule};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub use fs::FsStore;
pub use memory::MemoryStore;

use crate::error::ManifestError;
use crate::manifest::{verify_integrity, BundleArtifact, CompilationManifest};

/// The current and the immediately previous active versions.
pub const MIN_RETAINED_VERSIONS: usize = 2;

/// Bounds a bundle type must satisfy to be stored.
pub trait StoredBundle:
    BundleArtifact + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<B> StoredBundle for B where
    B: BundleArtifact + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// One stored bundle version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "B: Serialize", deserialize = "B: DeserializeOwned"))]
pub struct StoredVersion<B> {
    /// Manifest the bundle was built from, bound to the bundle.
    pub manifest: CompilationManifest,
    /// The compiled bundle.
    pub bundle: B,
    /// The rules compiled into the bundle, for rollback.
    pub rules: Vec<Rule>,
    /// Lifecycle status.
    pub status: BundleStatus,
    /// When the version was written.
    pub stored_at: DateTime<Utc>,
}

impl<B: BundleArtifact> StoredVersion<B> {
    /// A freshly compiled record.
    pub fn new(
        manifest: CompilationManifest,
        bundle: B,
        rules: Vec<Rule>,
        status: BundleStatus,
    ) -> Self {
        Self {
            manifest,
            bundle,
            rules,
            status,
            stored_at: Utc::now(),
        }
    }

    /// Namespace of the record.
    pub fn namespace(&self) -> &Namespace {
        self.bundle.namespace()
    }

    /// Version of the record.
    pub fn version(&self) -> BundleVersion {
        self.bundle.version()
    }

    pub(crate) fn verify(&self) -> Result<(), ManifestError> {
        if self.manifest.bundle.is_none() {
            return Err(ManifestError::Unbound(self.manifest.namespace.clone()));
        }
        verify_integrity(&self.manifest, &self.bundle)?;
        Ok(())
    }
}

/// Versioned manifest and bundle persistence.
pub trait VersionStore<B: StoredBundle>: Send + Sync {
    /// Write a new version. Rewriting an existing version is an error.
    fn put(&self, record: StoredVersion<B>) -> Result<(), ManifestError>;

    /// Read a version, verifying its integrity.
    fn get(
        &self,
        namespace: &Namespace,
        version: BundleVersion,
    ) -> Result<Option<StoredVersion<B>>, ManifestError>;

    /// Update the lifecycle status of a stored version.
    fn set_status(
        &self,
        namespace: &Namespace,
        version: BundleVersion,
        status: BundleStatus,
    ) -> Result<(), ManifestError>;

    /// Stored versions of `namespace`, ascending.
    fn versions(&self, namespace: &Namespace) -> Result<Vec<BundleVersion>, ManifestError>;

    /// Namespaces with at least one stored version.
    fn namespaces(&self) -> Result<Vec<Namespace>, ManifestError>;

    /// Delete a version.
    fn delete(&self, namespace: &Namespace, version: BundleVersion) -> Result<(), ManifestError>;

    /// Read a version that must exist.
    fn require(
        &self,
        namespace: &Namespace,
        version: BundleVersion,
    ) -> Result<StoredVersion<B>, ManifestError> {
        self.get(namespace, version)?
            .ok_or_else(|| ManifestError::VersionNotFound {
                namespace: namespace.clone(),
                version,
            })
    }

    /// Highest stored version.
    fn latest_version(&self, namespace: &Namespace) -> Result<Option<BundleVersion>, ManifestError> {
        Ok(self.versions(namespace)?.into_iter().max())
    }

    /// The version currently in `Active` status.
    fn active(&self, namespace: &Namespace) -> Result<Option<StoredVersion<B>>, ManifestError> {
        for version in self.versions(namespace)?.into_iter().rev() {
            if let Some(record) = self.get(namespace, version)? {
                if record.status == BundleStatus::Active {
                    return Ok(Some(record));
                }
            }
        }
        Ok(None)
    }

    /// Delete versions outside the retention window. Returns what was deleted.
    fn prune(
        &self,
        namespace: &Namespace,
        retain: usize,
    ) -> Result<Vec<BundleVersion>, ManifestError> {
        let retain = retain.max(MIN_RETAINED_VERSIONS);
        let mut statuses = Vec::new();
        for version in self.versions(namespace)?.into_iter().rev() {
            if let Some(record) = self.get(namespace, version)? {
                statuses.push((version, record.status));
            }
        }
        let newest_activated = statuses
            .iter()
            .find(|(_, s)| matches!(s, BundleStatus::Active | BundleStatus::Superseded))
            .map(|(v, _)| *v);
        let mut keep: BTreeSet<BundleVersion> = statuses
            .iter()
            .filter(|(_, s)| matches!(s, BundleStatus::Active | BundleStatus::Superseded))
            .take(retain)
            .map(|(v, _)| *v)
            .collect();
        for (version, status) in &statuses {
            let pending = newest_activated.map_or(true, |newest| *version > newest);
            if *status == BundleStatus::Active || pending {
                keep.insert(*version);
            }
        }
        let mut deleted = Vec::new();
        for (version, _) in statuses.into_iter().rev() {
            if !keep.contains(&version) {
                self.delete(namespace, version)?;
                deleted.push(version);
            }
        }
        if !deleted.is_empty() {
            tracing::info!(namespace = %namespace, pruned = deleted.len(), "pruned bundle versions");
        }
        Ok(deleted)
    }
}

pub(crate) fn check_transition(
    namespace: &Namespace,
    version: BundleVersion,
    from: BundleStatus,
    to: BundleStatus,
) -> Result<(), ManifestError> {
    if from == to || from.can_transition_to(to) {
        Ok(())
    } else {
        Err(cgov_core::StateTransitionError::InvalidTransition {
            subject: format!("bundle {namespace}/{version}"),
            from: from.to_string(),
            to: to.to_string(),
        }
        .into())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::BTreeSet;

    use cgov_core::{BundleStatus, BundleVersion, ContentDigest, Namespace, RuleId};
    use serde::{Deserialize, Serialize};

    use super::StoredVersion;
    use crate::manifest::tests::rule;
    use crate::manifest::{compute_manifest, BundleArtifact};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub(crate) struct TestBundle {
        pub namespace: Namespace,
        pub version: BundleVersion,
        pub text: String,
        pub manifest_digest: ContentDigest,
        pub ids: BTreeSet<RuleId>,
    }

    impl BundleArtifact for TestBundle {
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

    pub(crate) fn record(version: u64, status: BundleStatus) -> StoredVersion<TestBundle> {
        let ns = Namespace::new("ops").unwrap();
        let rules = vec![rule("r", &format!("deny {{\n    input.v == {version}\n}}"))];
        let text = format!("package cgov.ops\n# v{version}\n");
        let version = BundleVersion(version);
        let manifest = compute_manifest(ns.clone(), &rules).unwrap().bind(version, &text);
        let bundle = TestBundle {
            namespace: ns,
            version,
            manifest_digest: manifest.aggregate_digest,
            ids: rules.iter().map(|r| r.id.clone()).collect(),
            text,
        };
        StoredVersion::new(manifest, bundle, rules, status)
    }

    /// Behaviour every store implementation must share.
    pub(crate) fn exercise_store(store: &impl super::VersionStore<TestBundle>) {
        use crate::error::ManifestError;
        let ns = Namespace::new("ops").unwrap();
        assert!(store.active(&ns).unwrap().is_none());

        store.put(record(1, BundleStatus::Compiled)).unwrap();
        assert!(matches!(
            store.put(record(1, BundleStatus::Compiled)).unwrap_err(),
            ManifestError::AlreadyStored { .. }
        ));
        store.set_status(&ns, BundleVersion(1), BundleStatus::Active).unwrap();
        assert_eq!(store.active(&ns).unwrap().unwrap().version(), BundleVersion(1));

        store.put(record(2, BundleStatus::Compiled)).unwrap();
        store.set_status(&ns, BundleVersion(1), BundleStatus::Superseded).unwrap();
        store.set_status(&ns, BundleVersion(2), BundleStatus::Active).unwrap();
        assert!(store
            .set_status(&ns, BundleVersion(2), BundleStatus::Compiled)
            .is_err());

        store.put(record(3, BundleStatus::BlockedByConflict)).unwrap();
        assert_eq!(store.latest_version(&ns).unwrap(), Some(BundleVersion(3)));
        assert_eq!(store.namespaces().unwrap(), vec![ns.clone()]);
        let v1 = store.require(&ns, BundleVersion(1)).unwrap();
        assert_eq!(v1.rules.len(), 1);
        assert!(store.require(&ns, BundleVersion(9)).is_err());
    }

    /// Pruning keeps the active, the previous active and pending versions.
    pub(crate) fn exercise_retention(store: &impl super::VersionStore<TestBundle>) {
        let ns = Namespace::new("ops").unwrap();
        for v in 1..=5 {
            store.put(record(v, BundleStatus::Compiled)).unwrap();
        }
        for v in 1..=4u64 {
            if v > 1 {
                store
                    .set_status(&ns, BundleVersion(v - 1), BundleStatus::Superseded)
                    .unwrap();
            }
            store.set_status(&ns, BundleVersion(v), BundleStatus::Active).unwrap();
        }
        // v5 is compiled but not yet active.
        let deleted = store.prune(&ns, 1).unwrap();
        assert_eq!(deleted, vec![BundleVersion(1), BundleVersion(2)]);
        assert_eq!(
            store.versions(&ns).unwrap(),
            vec![BundleVersion(3), BundleVersion(4), BundleVersion(5)]
        );
    }
}
