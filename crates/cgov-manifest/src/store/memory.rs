use std::collections::BTreeMap;

use cgov_core::{BundleStatus, BundleVersion, Namespace};
use parking_lot::RwLock;

use super::{check_transition, StoredBundle, StoredVersion, VersionStore};
use crate::error::ManifestError;

type Versions<B> = BTreeMap<BundleVersion, StoredVersion<B>>;

/// Process-local store, used in tests and for ephemeral deployments.
#[derive(Debug)]
pub struct MemoryStore<B> {
    inner: RwLock<BTreeMap<Namespace, Versions<B>>>,
}

impl<B> Default for MemoryStore<B> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<B> MemoryStore<B> {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<B: StoredBundle> VersionStore<B> for MemoryStore<B> {
    fn put(&self, record: StoredVersion<B>) -> Result<(), ManifestError> {
        record.verify()?;
        let namespace = record.namespace().clone();
        let version = record.version();
        let mut inner = self.inner.write();
        let versions = inner.entry(namespace.clone()).or_default();
        if versions.contains_key(&version) {
            return Err(ManifestError::AlreadyStored { namespace, version });
        }
        versions.insert(version, record);
        Ok(())
    }

    fn get(
        &self,
        namespace: &Namespace,
        version: BundleVersion,
    ) -> Result<Option<StoredVersion<B>>, ManifestError> {
        let record = self
            .inner
            .read()
            .get(namespace)
            .and_then(|v| v.get(&version))
            .cloned();
        if let Some(record) = &record {
            record.verify()?;
        }
        Ok(record)
    }

    fn set_status(
        &self,
        namespace: &Namespace,
        version: BundleVersion,
        status: BundleStatus,
    ) -> Result<(), ManifestError> {
        let mut inner = self.inner.write();
        let record = inner
            .get_mut(namespace)
            .and_then(|v| v.get_mut(&version))
            .ok_or_else(|| ManifestError::VersionNotFound {
                namespace: namespace.clone(),
                version,
            })?;
        check_transition(namespace, version, record.status, status)?;
        record.status = status;
        Ok(())
    }

    fn versions(&self, namespace: &Namespace) -> Result<Vec<BundleVersion>, ManifestError> {
        Ok(self
            .inner
            .read()
            .get(namespace)
            .map(|v| v.keys().copied().collect())
            .unwrap_or_default())
    }

    fn namespaces(&self) -> Result<Vec<Namespace>, ManifestError> {
        Ok(self
            .inner
            .read()
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(ns, _)| ns.clone())
            .collect())
    }

    fn delete(&self, namespace: &Namespace, version: BundleVersion) -> Result<(), ManifestError> {
        if let Some(versions) = self.inner.write().get_mut(namespace) {
            versions.remove(&version);
        }
        Ok(())
    }
}
