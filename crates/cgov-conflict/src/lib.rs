//! # cgov-conflict — Conflict Detector/Resolver
//!
//! Static checks over a staged rule set, run before a bundle may go active.
//!
//! ## Detection
//!
//! - **Contradiction**: opposite conclusions whose guards can hold together.
//!   Equal priority is [`ConflictSeverity::Blocking`].
//! - **Scope overlap**: same conclusion, overlapping guards. A rule whose
//!   guard strictly contains another's is subsumed.
//! - **Redundancy**: same conclusion, identical guards.
//! - **Near-duplicate**: textual similarity above a threshold, through the
//!   pluggable [`SimilarityProvider`].
//!
//! Guard overlap is decided on `ref <cmp> literal` constraints; anything the
//! analysis cannot decide counts as overlapping.
//!
//! ## Resolution
//!
//! Deterministic patches first (priority tie-break, then retirement of
//! subsumed or duplicate rules); equal-priority contradictions go to the
//! [`EscalationQueue`]. Every resolution is appended to the conflict's
//! history with actor and timestamp.

pub mod config;
pub mod conflict;
pub mod detector;
pub mod error;
pub mod escalation;
pub mod guard;
pub mod patch;
pub mod resolver;
pub mod similarity;

pub use config::ConflictConfig;
pub use conflict::{
    Conflict, ConflictId, ConflictKind, ConflictSeverity, ConflictStatus, ResolutionAction,
    ResolutionRecord,
};
pub use detector::ConflictDetector;
pub use error::ConflictError;
pub use escalation::{
    EscalationId, EscalationQueue, EscalationRecord, EscalationState, HumanResolution,
};
pub use guard::Guard;
pub use patch::Patch;
pub use resolver::{ConflictResolver, Resolution, ResolutionReport};
pub use similarity::{JaccardSimilarity, SimilarityProvider};
