use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use cgov_core::{BundleStatus, BundleVersion, Namespace};

use super::{check_transition, StoredBundle, StoredVersion, VersionStore};
use crate::error::ManifestError;

/// Filesystem store. Each version is one JSON document at
/// `{base_dir}/{namespace}/{version:020}.json`; writes go through a
/// temporary file and an atomic rename.
#[derive(Debug, Clone)]
pub struct FsStore {
    base_dir: PathBuf,
}

impl FsStore {
    /// A store rooted at `base_dir`. The directory is created on first write.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Root directory.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn path_of(&self, namespace: &Namespace, version: BundleVersion) -> PathBuf {
        self.base_dir
            .join(namespace.as_str())
            .join(format!("{:020}.json", version.get()))
    }

    fn read<B: StoredBundle>(&self, path: &Path) -> Result<Option<StoredVersion<B>>, ManifestError> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write<B: StoredBundle>(&self, path: &Path, record: &StoredVersion<B>) -> Result<(), ManifestError> {
        let dir = path.parent().unwrap_or(&self.base_dir);
        fs::create_dir_all(dir)?;
        let tmp = path.with_extension("json.tmp");
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(&serde_json::to_vec_pretty(record)?)?;
            f.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl<B: StoredBundle> VersionStore<B> for FsStore {
    fn put(&self, record: StoredVersion<B>) -> Result<(), ManifestError> {
        record.verify()?;
        let path = self.path_of(record.namespace(), record.version());
        if path.exists() {
            return Err(ManifestError::AlreadyStored {
                namespace: record.namespace().clone(),
                version: record.version(),
            });
        }
        self.write(&path, &record)?;
        tracing::debug!(namespace = %record.namespace(), version = %record.version(), path = %path.display(), "stored bundle version");
        Ok(())
    }

    fn get(
        &self,
        namespace: &Namespace,
        version: BundleVersion,
    ) -> Result<Option<StoredVersion<B>>, ManifestError> {
        let record: Option<StoredVersion<B>> = self.read(&self.path_of(namespace, version))?;
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
        let path = self.path_of(namespace, version);
        let mut record: StoredVersion<B> =
            self.read(&path)?.ok_or_else(|| ManifestError::VersionNotFound {
                namespace: namespace.clone(),
                version,
            })?;
        record.verify()?;
        check_transition(namespace, version, record.status, status)?;
        record.status = status;
        self.write(&path, &record)
    }

    fn versions(&self, namespace: &Namespace) -> Result<Vec<BundleVersion>, ManifestError> {
        let dir = self.base_dir.join(namespace.as_str());
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut versions = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(n) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
            {
                versions.push(BundleVersion(n));
            }
        }
        versions.sort();
        Ok(versions)
    }

    fn namespaces(&self) -> Result<Vec<Namespace>, ManifestError> {
        let entries = match fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(ns) = entry.file_name().to_str().and_then(|n| Namespace::new(n).ok()) {
                if !VersionStore::<B>::versions(self, &ns)?.is_empty() {
                    out.push(ns);
                }
            }
        }
        out.sort();
        Ok(out)
    }

    fn delete(&self, namespace: &Namespace, version: BundleVersion) -> Result<(), ManifestError> {
        match fs::remove_file(self.path_of(namespace, version)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
