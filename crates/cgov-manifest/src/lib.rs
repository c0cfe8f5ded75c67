//! # cgov-manifest — Manifest Manager
//!
//! The system of record for "what changed since the last compiled version".
//!
//! - [`compute_manifest`] hashes a rule set into a [`CompilationManifest`]:
//!   per-rule content digests, rule count, format distribution and an
//!   aggregate digest. Hashing is content-based, so re-submitting identical
//!   rules never triggers a recompilation.
//! - [`diff`] compares two manifests and returns the [`cgov_core::ChangeSet`]
//!   the compiler uses to choose between a full and a partial rebuild.
//! - [`verify_integrity`] checks a compiled bundle against its manifest. A
//!   mismatch is a fatal [`cgov_core::IntegrityError`].
//! - [`RuleRegistry`] keeps every version of every rule. Active rules are
//!   never edited in place: an update appends version `n + 1`.
//! - [`VersionStore`] persists manifests and bundles by version for rollback,
//!   with an in-memory and a filesystem implementation.

pub mod error;
pub mod manifest;
pub mod registry;
pub mod store;

pub use error::ManifestError;
pub use manifest::{
    compute_manifest, diff, verify_integrity, BundleArtifact, BundleRef, CompilationManifest,
};
pub use registry::{RuleRegistry, UpsertOutcome};
pub use store::{FsStore, MemoryStore, StoredVersion, VersionStore, MIN_RETAINED_VERSIONS};
