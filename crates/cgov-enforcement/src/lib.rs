//! # cgov-enforcement — Enforcement Optimizer
//!
//! Answers `enforce(request, context)` with an [`EnforcementDecision`].
//!
//! ## Request path
//!
//! 1. Pick a strategy. `Adaptive` resolves to one of the other three
//!    through [`AdaptiveSelector`], a small state machine over a rolling
//!    window of latency and rule-priority samples.
//! 2. Look the request fingerprint up in the multi-tier cache, checked
//!    against the active bundle version. A hit returns immediately.
//! 3. On a miss, derive context facts, query the runtime under the
//!    caller's deadline, store the result and record a sample.
//! 4. If the runtime stays unavailable after the bounded retry, apply the
//!    deployment's [`cgov_runtime::FailurePolicy`]: deny for safety-critical
//!    contexts, allow with a warning otherwise. Failure decisions carry a
//!    reason and are never cached.
//!
//! No lock is held across a runtime call.

pub mod active;
pub mod adaptive;
pub mod config;
pub mod decision;
pub mod error;
pub mod optimizer;
pub mod strategy;
pub mod window;

pub use active::ActiveBundles;
pub use adaptive::{AdaptiveSelector, StrategySwitch};
pub use config::{AdaptiveConfig, EnforcementConfig};
pub use decision::{EnforcementContext, EnforcementDecision, EnforcementRequest};
pub use error::EnforcementError;
pub use optimizer::EnforcementOptimizer;
pub use strategy::StrategyKind;
pub use window::{RollingWindow, Sample, WindowStats};
