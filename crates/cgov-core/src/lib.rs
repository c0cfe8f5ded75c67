#![deny(missing_docs)]

//! # cgov-core — Foundational Types for the Policy Engine
//!
//! Every other crate in the workspace depends on this one. It has no internal
//! crate dependencies, only `serde`, `serde_json`, `thiserror`, `chrono`
//! and `sha2` from the external ecosystem.
//!
//! ## Design Principles
//!
//! 1. **Newtype wrappers for identifiers.** A [`RuleId`] is validated at
//!    construction and cannot be confused with a namespace or a bundle version.
//!
//! 2. **[`CanonicalBytes`] is the sole path to digest computation.** Rule
//!    hashes, manifest aggregates and integrity checks all flow through
//!    `CanonicalBytes::new()`, so identical content always yields an identical
//!    digest regardless of field order or timestamps.
//!
//! 3. **One canonical policy language.** The [`lang`] module owns the lexer,
//!    parser and deterministic renderer for the Rego-compatible subset that the
//!    external runtime consumes. Every rule, whatever its source format, ends
//!    up as a [`lang::CanonicalRule`].
//!
//! 4. **[`CgovError`] taxonomy.** Format, integrity, cycle, blocking-conflict,
//!    runtime-unavailable and cache-inconsistency failures are distinct
//!    variants with enough context to act on.

pub mod canonical;
pub mod change;
pub mod digest;
pub mod error;
pub mod lang;
pub mod rule;
pub mod version;

// Re-export primary types at crate root for ergonomic imports.
pub use canonical::CanonicalBytes;
pub use change::ChangeSet;
pub use digest::{sha256_digest, sha256_raw, ContentDigest};
pub use error::{
    CanonicalizationError, CgovError, FormatError, IntegrityError, StateTransitionError,
    ValidationError,
};
pub use rule::{Rule, RuleBuilder, RuleId, RuleStatus, SourceFormat};
pub use version::{BundleStatus, BundleVersion, Namespace};
