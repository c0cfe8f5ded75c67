//! # cgov-engine — Pipeline Orchestration
//!
//! Owns the path from submitted rule payloads to a serving bundle:
//!
//! 1. **Normalize** every submission through the format router. A single
//!    rejected payload rejects the batch.
//! 2. **Stage** the rules in the namespace's registry as candidates.
//! 3. **Detect and resolve** conflicts. Deterministic patches are applied
//!    and the rule set is re-checked; blocking conflicts without a patch
//!    are escalated for review.
//! 4. **Compile** incrementally against the last bundle and **store** the
//!    version with its manifest.
//! 5. **Gate**: blocking conflicts leave the bundle `BlockedByConflict`
//!    while the previous bundle keeps serving.
//! 6. **Deploy**: verify, push to the runtime, invalidate superseded cache
//!    entries, then advertise the new version.
//!
//! The [`Engine`] also answers enforcement requests through the
//! [`cgov_enforcement::EnforcementOptimizer`] and exposes Prometheus
//! metrics.

pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod report;
pub mod telemetry;

pub use config::{ContextConfig, EngineConfig, ServerConfig, StoreConfig};
pub use engine::{Engine, SharedStore};
pub use error::EngineError;
pub use metrics::EngineMetrics;
pub use report::{Activation, CompileBatch, CompileReport, EscalationOutcome, RuleSubmission};
pub use telemetry::{init_tracing, LogFormat};
