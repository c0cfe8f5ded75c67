//! Namespace and bundle version primitives.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A rule-set namespace. Compilation is serialized per namespace and the
/// namespace becomes the last segment of the compiled package path
/// (`package cgov.<namespace>`), so it must be a valid identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Namespace(String);

impl Namespace {
    /// Validate and wrap a namespace name.
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        let mut chars = name.chars();
        let valid = name.len() <= 64
            && chars.next().is_some_and(|c| c.is_ascii_lowercase())
            && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if valid {
            Ok(Self(name))
        } else {
            Err(ValidationError::InvalidNamespace(name))
        }
    }

    /// The namespace as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The package path compiled bundles for this namespace declare.
    pub fn package_path(&self) -> String {
        format!("cgov.{}", self.0)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Namespace {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Namespace> for String {
    fn from(ns: Namespace) -> Self {
        ns.0
    }
}

/// Deployable bundle version. Monotonically increasing per namespace,
/// starting at 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct BundleVersion(pub u64);

impl BundleVersion {
    /// The first version ever produced for a namespace.
    pub const INITIAL: BundleVersion = BundleVersion(1);

    /// The version following this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Raw numeric value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BundleVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Lifecycle of a compiled bundle.
///
/// ```text
/// Compiled ──gate ok──▶ Active ──newer activated──▶ Superseded
///    │                    ▲
///    └──blocking──▶ BlockedByConflict ──resolved──┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleStatus {
    /// Built and integrity-checked, not yet gated.
    Compiled,
    /// At least one blocking conflict is unresolved.
    BlockedByConflict,
    /// Deployed to the runtime and serving decisions.
    Active,
    /// Replaced by a newer active bundle; retained for rollback.
    Superseded,
    /// Compilation or deployment failed; never served.
    Failed,
}

impl BundleStatus {
    /// Return the string value used in API responses and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compiled => "compiled",
            Self::BlockedByConflict => "blocked_by_conflict",
            Self::Active => "active",
            Self::Superseded => "superseded",
            Self::Failed => "failed",
        }
    }

    /// Whether the lifecycle permits moving from `self` to `to`.
    pub fn can_transition_to(&self, to: BundleStatus) -> bool {
        use BundleStatus::*;
        matches!(
            (self, to),
            (Compiled, Active)
                | (Compiled, BlockedByConflict)
                | (Compiled, Failed)
                | (BlockedByConflict, Active)
                | (BlockedByConflict, Failed)
                | (Active, Superseded)
                | (Superseded, Active)
        )
    }
}

impl fmt::Display for BundleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
