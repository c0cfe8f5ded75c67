//! # Incremental Compiler
//!
//! `compile(changes, existing) -> CompiledBundle`. The compiler owns the
//! dependency graph for each run; the caller supplies the full current rule
//! set, the change set produced by the manifest diff, and the bundle those
//! changes apply to.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use cgov_core::lang::parse_module;
use cgov_core::{sha256_raw, BundleVersion, ChangeSet, Namespace, Rule, RuleId};
use cgov_manifest::{compute_manifest, CompilationManifest};
use parking_lot::Mutex;

use crate::bundle::{assemble, CompileMode, CompiledBundle};
use crate::calibrator::CompileCalibrator;
use crate::config::CompilerConfig;
use crate::error::CompileError;
use crate::fragment::render_fragment;
use crate::graph::DependencyGraph;

/// Input to one compilation.
#[derive(Debug, Clone, Copy)]
pub struct CompileRequest<'a> {
    /// Namespace being compiled.
    pub namespace: &'a Namespace,
    /// The complete rule set after the change.
    pub rules: &'a BTreeMap<RuleId, Rule>,
    /// What changed relative to `existing`.
    pub changes: &'a ChangeSet,
    /// The bundle the changes apply to, if any.
    pub existing: Option<&'a CompiledBundle>,
    /// Version to stamp on a newly produced bundle.
    pub version: BundleVersion,
}

/// Result of one compilation.
#[derive(Debug, Clone)]
pub struct CompileOutput {
    /// The bundle.
    pub bundle: CompiledBundle,
    /// Manifest of the compiled rule set, bound to the bundle.
    pub manifest: CompilationManifest,
    /// Rules whose fragments were rendered.
    pub affected: BTreeSet<RuleId>,
    /// True when nothing changed and `existing` was returned as is.
    pub reused: bool,
}

/// Dependency-aware compiler with a calibrated rebuild threshold.
#[derive(Debug)]
pub struct IncrementalCompiler {
    config: CompilerConfig,
    calibrator: Mutex<CompileCalibrator>,
}

impl IncrementalCompiler {
    /// A compiler with validated configuration.
    pub fn new(config: CompilerConfig) -> Result<Self, CompileError> {
        config.validate()?;
        Ok(Self {
            calibrator: Mutex::new(CompileCalibrator::new(&config)),
            config,
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Current full-rebuild threshold.
    pub fn threshold(&self) -> f64 {
        self.calibrator.lock().threshold()
    }

    /// Compile `rules` from scratch.
    pub fn compile_full(
        &self,
        namespace: &Namespace,
        rules: &BTreeMap<RuleId, Rule>,
        version: BundleVersion,
    ) -> Result<CompileOutput, CompileError> {
        let changes = ChangeSet::all_added(rules.keys().cloned());
        self.compile(CompileRequest {
            namespace,
            rules,
            changes: &changes,
            existing: None,
            version,
        })
    }

    /// Compile a change set against an existing bundle.
    pub fn compile(&self, req: CompileRequest<'_>) -> Result<CompileOutput, CompileError> {
        let started = Instant::now();
        if let Some(missing) = req.changes.upserted().into_iter().find(|id| !req.rules.contains_key(id)) {
            return Err(CompileError::UnknownRule(missing));
        }
        let manifest = compute_manifest(req.namespace.clone(), req.rules.values())?;

        if let Some(existing) = req.existing {
            if &existing.namespace != req.namespace {
                return Err(CompileError::NamespaceMismatch {
                    expected: req.namespace.clone(),
                    found: existing.namespace.clone(),
                });
            }
            if req.changes.is_empty() && existing.manifest_digest == manifest.aggregate_digest {
                tracing::debug!(namespace = %req.namespace, version = %existing.version, "no changes, reusing bundle");
                return Ok(CompileOutput {
                    manifest: manifest.bind(existing.version, &existing.text),
                    bundle: existing.clone(),
                    affected: BTreeSet::new(),
                    reused: true,
                });
            }
        }

        let graph = DependencyGraph::build(req.rules.values());
        let order = graph.topological_order()?;
        let total = req.rules.len();

        let base = req.existing.filter(|b| match b.verify_assembly() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(namespace = %req.namespace, error = %e, "existing bundle failed verification, rebuilding fully");
                false
            }
        });

        let affected = match base {
            Some(existing) => affected_set(&graph, existing, req.changes, req.rules),
            None => req.rules.keys().cloned().collect(),
        };
        let ratio = if total == 0 { 0.0 } else { affected.len() as f64 / total as f64 };
        let threshold = self.threshold();
        let mode = match base {
            Some(_) if ratio <= threshold => CompileMode::Partial {
                recompiled: affected.len(),
            },
            _ => CompileMode::Full,
        };
        let rendered_count = match mode {
            CompileMode::Full => total,
            CompileMode::Partial { recompiled } => recompiled,
        };
        let estimated = self.calibrator.lock().estimate(mode, rendered_count, total);

        let render_started = Instant::now();
        let mut fragments = BTreeMap::new();
        for id in &order {
            let reuse = match (mode, base) {
                (CompileMode::Partial { .. }, Some(existing)) if !affected.contains(id) => {
                    existing.fragments.get(id)
                }
                _ => None,
            };
            let fragment = match reuse {
                Some(f) => f.clone(),
                None => {
                    let rule = &req.rules[id];
                    let deps: BTreeMap<&RuleId, &Rule> = graph
                        .dependencies(id)
                        .filter_map(|d| req.rules.get(d).map(|r| (d, r)))
                        .collect();
                    render_fragment(rule, &deps)
                }
            };
            fragments.insert(id.clone(), fragment);
        }
        let render_time = render_started.elapsed();

        let text = assemble(req.namespace, &order, &fragments);
        parse_module(&text).map_err(|e| CompileError::InvalidBundle(e.to_string()))?;
        let digest = sha256_raw(text.as_bytes());
        let actual = started.elapsed();
        self.calibrator
            .lock()
            .record(mode, rendered_count, total, render_time, actual);

        let bundle = CompiledBundle {
            namespace: req.namespace.clone(),
            version: req.version,
            manifest_digest: manifest.aggregate_digest,
            fragments,
            order,
            dependencies: graph.edges().clone(),
            digest,
            priorities: req.rules.iter().map(|(id, r)| (id.clone(), r.priority)).collect(),
            categories: req
                .rules
                .iter()
                .filter_map(|(id, r)| r.category.clone().map(|c| (id.clone(), c)))
                .collect(),
            mode,
            estimated_micros: u64::try_from(estimated.as_micros()).unwrap_or(u64::MAX),
            actual_micros: u64::try_from(actual.as_micros()).unwrap_or(u64::MAX),
            text,
        };
        tracing::info!(
            namespace = %req.namespace,
            version = %req.version,
            mode = mode.as_str(),
            affected = affected.len(),
            total,
            estimated_us = bundle.estimated_micros,
            actual_us = bundle.actual_micros,
            "bundle compiled"
        );
        let manifest = manifest.bind(req.version, &bundle.text);
        Ok(CompileOutput {
            bundle,
            manifest,
            affected: match mode {
                CompileMode::Full => req.rules.keys().cloned().collect(),
                CompileMode::Partial { .. } => affected,
            },
            reused: false,
        })
    }
}

/// Changed rules plus their transitive dependents, over the union of the
/// new graph and the dependencies recorded in the existing bundle (a rule
/// whose dependency was removed or renamed only shows up in the old edges).
/// Rules missing from the existing bundle are always affected.
fn affected_set(
    graph: &DependencyGraph,
    existing: &CompiledBundle,
    changes: &ChangeSet,
    rules: &BTreeMap<RuleId, Rule>,
) -> BTreeSet<RuleId> {
    let combined = graph.union(&DependencyGraph::from_edges(existing.dependencies.clone()));
    let seeds = changes.all();
    let mut affected: BTreeSet<RuleId> = combined
        .dependents_closure(&seeds)
        .into_iter()
        .filter(|id| rules.contains_key(id))
        .collect();
    affected.extend(
        rules
            .keys()
            .filter(|id| !existing.fragments.contains_key(*id))
            .cloned(),
    );
    affected
}
