//! # cgov-compiler — Dependency Graph & Incremental Compiler
//!
//! Turns a rule set into a deployable [`CompiledBundle`], recompiling only
//! what a change affects.
//!
//! ## Pipeline
//!
//! 1. [`DependencyGraph::build`] links every rule to the rules defining the
//!    predicates it consumes and the rules it is overridden by.
//! 2. [`DependencyGraph::topological_order`] orders rules dependencies-first,
//!    ties broken by rule id. A cycle is a fatal [`CompileError::Cycle`]
//!    naming every rule on it; no bundle is produced.
//! 3. The affected set is the changed rules plus everything that
//!    transitively depends on them.
//! 4. If `affected / total` exceeds the rebuild threshold the whole bundle
//!    is rebuilt; otherwise affected fragments are re-rendered and spliced
//!    into the existing bundle.
//!
//! ## Determinism
//!
//! A fragment is a pure function of its rule and the content digests of its
//! direct dependencies, and bundle text carries no version stamp or
//! timestamp. A partial compilation therefore produces byte-for-byte the
//! same bundle as a full compilation of the same rule set.

pub mod bundle;
pub mod calibrator;
pub mod compiler;
pub mod config;
pub mod error;
pub mod fragment;
pub mod graph;
pub mod locks;

pub use bundle::{CompileMode, CompiledBundle};
pub use calibrator::CompileCalibrator;
pub use compiler::{CompileOutput, CompileRequest, IncrementalCompiler};
pub use config::CompilerConfig;
pub use error::CompileError;
pub use graph::DependencyGraph;
pub use locks::{NamespaceGuard, NamespaceLocks};
