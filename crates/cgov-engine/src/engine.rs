//! # Engine
//!
//! Wires the components together and owns the per-namespace pipeline:
//!
//! ```text
//! normalize ─▶ stage in registry ─▶ detect/resolve ─▶ compile ─▶ store
//!                                      (repeat while       │
//!                                       patches apply)     ▼
//!                            activate ◀─ invalidate ◀─ push ◀─ gate
//! ```
//!
//! Each run holds the namespace's compilation lock from staging to
//! activation. Staged rule changes are committed to the namespace only
//! when the run succeeds; a failed compilation leaves the previous state
//! untouched and produces no bundle.

use std::collections::BTreeMap;
use std::sync::Arc;

use cgov_cache::MultiTierCache;
use cgov_compiler::{CompileRequest, CompiledBundle, IncrementalCompiler, NamespaceLocks};
use cgov_conflict::{
    Conflict, ConflictDetector, ConflictError, ConflictId, ConflictResolver, EscalationId, EscalationQueue,
    EscalationRecord, EscalationState, HumanResolution, ResolutionReport,
};
use cgov_core::{
    BundleStatus, BundleVersion, ChangeSet, Namespace, Rule, RuleId, StateTransitionError,
};
use cgov_enforcement::{
    ActiveBundles, EnforcementContext, EnforcementDecision, EnforcementOptimizer, EnforcementRequest,
};
use cgov_facts::FactEvaluator;
use cgov_manifest::{
    compute_manifest, diff, verify_integrity, CompilationManifest, FsStore, ManifestError, MemoryStore,
    RuleRegistry, StoredVersion, VersionStore,
};
use cgov_router::{FormatRouter, RawRule};
use cgov_runtime::{HttpRuntimeClient, PolicyRuntime};
use dashmap::DashMap;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::metrics::EngineMetrics;
use crate::report::{Activation, CompileBatch, CompileReport, EscalationOutcome, RuleSubmission};

/// Detect/resolve rounds before the remaining conflicts are reported as is.
const MAX_RESOLUTION_ROUNDS: usize = 4;

/// Shared version store.
pub type SharedStore = Arc<dyn VersionStore<CompiledBundle>>;

#[derive(Debug, Clone)]
struct Compiled {
    bundle: Arc<CompiledBundle>,
    manifest: CompilationManifest,
}

/// Per-namespace working state.
#[derive(Debug, Clone, Default)]
struct NamespaceState {
    registry: RuleRegistry,
    /// Most recent bundle compiled, active or not; the base for the next
    /// incremental compilation.
    last: Option<Compiled>,
    conflicts: Vec<Conflict>,
}

/// The policy compilation and enforcement engine.
pub struct Engine {
    config: EngineConfig,
    router: FormatRouter,
    compiler: IncrementalCompiler,
    detector: ConflictDetector,
    resolver: ConflictResolver,
    cache: Arc<MultiTierCache>,
    runtime: Arc<dyn PolicyRuntime>,
    store: SharedStore,
    active: Arc<ActiveBundles>,
    optimizer: EnforcementOptimizer,
    locks: NamespaceLocks,
    namespaces: DashMap<Namespace, NamespaceState>,
    metrics: EngineMetrics,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("namespaces", &self.namespaces.len())
            .field("active", &self.active.namespaces())
            .finish()
    }
}

impl Engine {
    /// Assemble an engine from explicit collaborators.
    pub fn new(
        config: EngineConfig,
        runtime: Arc<dyn PolicyRuntime>,
        store: SharedStore,
        facts: FactEvaluator,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let cache = Arc::new(MultiTierCache::in_memory(config.cache.clone()));
        let active = Arc::new(ActiveBundles::new());
        let optimizer = EnforcementOptimizer::new(
            config.enforcement.clone(),
            Arc::clone(&runtime),
            Arc::clone(&cache),
            Arc::new(facts),
            Arc::clone(&active),
        )?;
        Ok(Self {
            router: FormatRouter::new(config.router.clone()),
            compiler: IncrementalCompiler::new(config.compiler.clone())?,
            detector: ConflictDetector::new(config.conflict.clone()),
            resolver: ConflictResolver::new(config.conflict.clone(), Arc::new(EscalationQueue::new())),
            cache,
            runtime,
            store,
            active,
            optimizer,
            locks: NamespaceLocks::new(),
            namespaces: DashMap::new(),
            metrics: EngineMetrics::new()?,
            config,
        })
    }

    /// Build from configuration: HTTP runtime client, filesystem or memory
    /// store, and the configured context program.
    pub fn from_config(config: EngineConfig) -> Result<Self, EngineError> {
        let runtime: Arc<dyn PolicyRuntime> = Arc::new(HttpRuntimeClient::new(&config.runtime)?);
        let store: SharedStore = match &config.store.dir {
            Some(dir) => Arc::new(FsStore::new(dir)),
            None => Arc::new(MemoryStore::<CompiledBundle>::new()),
        };
        let facts = match &config.context.program {
            Some(path) => FactEvaluator::from_source(config.context.limits.clone(), &std::fs::read_to_string(path)?)?,
            None => FactEvaluator::empty(),
        };
        Self::new(config, runtime, store, facts)
    }

    /// Active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Metrics registry.
    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// The enforcement optimizer.
    pub fn optimizer(&self) -> &EnforcementOptimizer {
        &self.optimizer
    }

    /// The decision and bundle cache.
    pub fn cache(&self) -> &Arc<MultiTierCache> {
        &self.cache
    }

    /// The escalation queue.
    pub fn escalation_queue(&self) -> &Arc<EscalationQueue> {
        self.resolver.queue()
    }

    fn snapshot(&self, namespace: &Namespace) -> NamespaceState {
        self.namespaces
            .get(namespace)
            .map(|s| s.value().clone())
            .unwrap_or_default()
    }

    fn commit(&self, namespace: &Namespace, state: NamespaceState) {
        self.namespaces.insert(namespace.clone(), state);
    }

    // -- Pipeline -------------------------------------------------------------

    /// Stage a batch of rule changes and run the pipeline. Format errors
    /// reject the whole batch before anything is staged.
    pub async fn compile(&self, namespace: &Namespace, batch: CompileBatch) -> Result<CompileReport, EngineError> {
        let rules = batch
            .upserts
            .iter()
            .map(|s| self.normalize(s))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .flatten();

        let _guard = self.locks.acquire(namespace).await;
        let mut state = self.snapshot(namespace);
        for rule in rules {
            state.registry.upsert(rule);
        }
        for id in &batch.removals {
            state.registry.remove(id)?;
        }
        let report = self.run_pipeline(namespace, &mut state).await?;
        self.commit(namespace, state);
        Ok(report)
    }

    /// Re-run the gate for a namespace whose latest bundle is blocked. Still
    /// blocked is an error.
    pub async fn activate(&self, namespace: &Namespace) -> Result<CompileReport, EngineError> {
        let _guard = self.locks.acquire(namespace).await;
        let mut state = self.snapshot(namespace);
        if state.last.is_none() {
            return Err(EngineError::NotFound(format!("compiled bundle for namespace {namespace}")));
        }
        let report = self.run_pipeline(namespace, &mut state).await?;
        self.commit(namespace, state);
        if report.status == BundleStatus::BlockedByConflict {
            return Err(blocked(&report.conflicts));
        }
        Ok(report)
    }

    /// Record a reviewer's decision and re-gate the namespace. An applied
    /// patch changes the staged rules first.
    pub async fn resolve_escalation(
        &self,
        id: EscalationId,
        resolution: HumanResolution,
        actor: &str,
    ) -> Result<EscalationOutcome, EngineError> {
        let namespace = self
            .resolver
            .queue()
            .get(id)
            .ok_or(ConflictError::EscalationNotFound(id))?
            .namespace;
        let _guard = self.locks.acquire(&namespace).await;
        let mut state = self.snapshot(&namespace);
        // The patch must apply to the staged rules before the escalation closes.
        if let HumanResolution::ApplyPatch { patch } = &resolution {
            let before = state.registry.working_set();
            let mut after = before.clone();
            patch.apply(&mut after)?;
            sync_registry(&mut state.registry, &before, &after)?;
        }
        let record = self.resolver.queue().resolve(id, resolution, actor)?;
        let compile = self.run_pipeline(&namespace, &mut state).await?;
        self.commit(&namespace, state);
        Ok(EscalationOutcome {
            escalation: record,
            compile,
        })
    }

    /// Make a stored version active again. Only a previously active
    /// version qualifies; it is re-verified before it is pushed.
    pub async fn rollback(&self, namespace: &Namespace, version: BundleVersion) -> Result<Activation, EngineError> {
        let _guard = self.locks.acquire(namespace).await;
        let record = self.store.require(namespace, version)?;
        if record.status == BundleStatus::Active {
            return Ok(Activation {
                namespace: namespace.clone(),
                version,
                previous: Some(version),
                invalidated: 0,
            });
        }
        if record.status != BundleStatus::Superseded {
            return Err(ManifestError::Transition(StateTransitionError::InvalidTransition {
                subject: format!("bundle {namespace}/{version}"),
                from: record.status.to_string(),
                to: BundleStatus::Active.to_string(),
            })
            .into());
        }
        let bundle = Arc::new(record.bundle);
        let activation = self.deploy(namespace, &bundle, &record.manifest).await?;

        let mut state = self.snapshot(namespace);
        state.registry.reinstate(record.rules.iter().cloned())?;
        state.conflicts = self.detector.detect(&record.rules);
        state.last = Some(Compiled {
            bundle,
            manifest: record.manifest,
        });
        self.commit(namespace, state);
        tracing::info!(namespace = %namespace, version = %version, previous = ?activation.previous, "rolled back");
        Ok(activation)
    }

    /// Re-activate the stored active version of every namespace, e.g. after
    /// a restart with a filesystem store. Returns how many were restored.
    pub async fn recover(&self) -> Result<usize, EngineError> {
        let mut restored = 0;
        for namespace in self.store.namespaces()? {
            let _guard = self.locks.acquire(&namespace).await;
            let Some(record) = self.store.active(&namespace)? else {
                continue;
            };
            record.bundle.verify_assembly()?;
            verify_integrity(&record.manifest, &record.bundle)?;
            self.runtime
                .push_bundle(&namespace, record.bundle.version, &record.bundle.text)
                .await?;
            let bundle = Arc::new(record.bundle);
            self.cache.invalidate_superseded(&namespace, bundle.version).await?;
            self.active.set(Arc::clone(&bundle));
            self.metrics.set_active_version(&namespace, bundle.version);

            let mut state = NamespaceState::default();
            state.registry.reinstate(record.rules.iter().cloned())?;
            state.conflicts = self.detector.detect(&record.rules);
            state.last = Some(Compiled {
                bundle,
                manifest: record.manifest,
            });
            self.commit(&namespace, state);
            restored += 1;
        }
        if restored > 0 {
            tracing::info!(restored, "active bundles recovered from store");
        }
        Ok(restored)
    }

    fn normalize(&self, submission: &RuleSubmission) -> Result<Vec<Rule>, EngineError> {
        let raw = RawRule::new(submission.id.clone(), submission.payload.clone());
        let normalized = self
            .router
            .normalize_all(&raw, submission.format)
            .map_err(|source| EngineError::Format {
                rule: submission.id.to_string(),
                source,
            })?;
        let mut out = Vec::with_capacity(normalized.len());
        for n in normalized {
            let mut builder = Rule::builder(n.id, n.format, n.canonical)
                .priority(submission.priority.or(n.priority).unwrap_or(0));
            if let Some(category) = submission.category.clone().or(n.category) {
                builder = builder.category(category);
            }
            for winner in n.overrides {
                builder = builder.overrides(winner);
            }
            out.push(builder.build()?);
        }
        Ok(out)
    }

    /// Detect, resolve, compile, gate and (when the gate passes) activate
    /// the staged working set. Mutates `state` only on success paths.
    async fn run_pipeline(&self, namespace: &Namespace, state: &mut NamespaceState) -> Result<CompileReport, EngineError> {
        let before = state.registry.working_set();
        let mut rules = before.clone();
        let (conflicts, resolution) = self.detect_and_resolve(namespace, &mut rules)?;
        self.metrics.record_conflicts(&conflicts);
        sync_registry(&mut state.registry, &before, &rules)?;
        let rules = state.registry.working_set();

        let manifest = compute_manifest(namespace.clone(), rules.values())?;
        // A bundle whose push failed cannot be activated again; rebuild.
        let base = match &state.last {
            Some(last) => self
                .store
                .get(namespace, last.bundle.version)?
                .filter(|r| r.status != BundleStatus::Failed)
                .map(|_| last),
            None => None,
        };
        let (existing, changes) = match base {
            Some(last) => (Some(last.bundle.as_ref()), diff(&last.manifest, &manifest)),
            None => (None, ChangeSet::all_added(rules.keys().cloned())),
        };
        let version = self
            .store
            .latest_version(namespace)?
            .map_or(BundleVersion::INITIAL, BundleVersion::next);
        let output = self.compiler.compile(CompileRequest {
            namespace,
            rules: &rules,
            changes: &changes,
            existing,
            version,
        })?;

        let bundle = Arc::new(output.bundle);
        let mut status = if output.reused {
            self.store.require(namespace, bundle.version)?.status
        } else {
            self.metrics.record_compile(&bundle);
            self.store.put(StoredVersion::new(
                output.manifest.clone(),
                (*bundle).clone(),
                rules.values().cloned().collect(),
                BundleStatus::Compiled,
            ))?;
            BundleStatus::Compiled
        };

        let mut error = None;
        if !resolution.blocking.is_empty() {
            if status != BundleStatus::BlockedByConflict {
                self.store
                    .set_status(namespace, bundle.version, BundleStatus::BlockedByConflict)?;
                status = BundleStatus::BlockedByConflict;
            }
            let err = blocked(&conflicts);
            tracing::warn!(
                namespace = %namespace,
                version = %bundle.version,
                blocking = resolution.blocking.len(),
                serving = ?self.active.version(namespace),
                "bundle blocked by conflicts"
            );
            error = Some(err.to_string());
        } else if status != BundleStatus::Active {
            self.deploy(namespace, &bundle, &output.manifest).await?;
            state.registry.activate()?;
            status = BundleStatus::Active;
        }

        state.conflicts = conflicts.clone();
        state.last = Some(Compiled {
            bundle: Arc::clone(&bundle),
            manifest: output.manifest.clone(),
        });
        Ok(CompileReport {
            namespace: namespace.clone(),
            manifest_digest: output.manifest.aggregate_digest,
            bundle_version: bundle.version,
            status,
            mode: bundle.mode,
            affected: output.affected.into_iter().collect(),
            reused: output.reused,
            conflicts,
            resolution,
            error,
        })
    }

    /// Run detection and resolution until no patch changes the rule set.
    /// Returns every conflict seen, latest state per id.
    fn detect_and_resolve(
        &self,
        namespace: &Namespace,
        rules: &mut BTreeMap<RuleId, Rule>,
    ) -> Result<(Vec<Conflict>, ResolutionReport), EngineError> {
        let mut seen: BTreeMap<ConflictId, Conflict> = BTreeMap::new();
        let mut patches = Vec::new();
        let mut escalations = Vec::new();
        let mut accepted = 0;
        let mut round = 0;
        loop {
            round += 1;
            let mut conflicts = self.detector.detect(rules.values());
            let report = self.resolver.resolve_all(namespace, &mut conflicts, rules)?;
            let changed = report.changed_rules();
            patches.extend(report.patches);
            escalations.extend(report.escalations);
            accepted += report.accepted;
            for c in conflicts {
                seen.insert(c.id.clone(), c);
            }
            if !changed || round == MAX_RESOLUTION_ROUNDS {
                let mut all: Vec<Conflict> = seen.into_values().collect();
                all.sort_by(|x, y| y.severity.cmp(&x.severity).then_with(|| x.id.cmp(&y.id)));
                escalations.sort_by_key(|e: &EscalationRecord| e.id);
                escalations.dedup_by_key(|e| e.id);
                return Ok((
                    all,
                    ResolutionReport {
                        patches,
                        escalations,
                        accepted,
                        blocking: report.blocking,
                    },
                ));
            }
            tracing::debug!(namespace = %namespace, round, "patches applied, re-checking conflicts");
        }
    }

    /// Verify, push, invalidate superseded decisions, then advertise.
    async fn deploy(
        &self,
        namespace: &Namespace,
        bundle: &Arc<CompiledBundle>,
        manifest: &CompilationManifest,
    ) -> Result<Activation, EngineError> {
        bundle.verify_assembly()?;
        verify_integrity(manifest, bundle.as_ref())?;
        let version = bundle.version;

        if let Err(e) = self.runtime.push_bundle(namespace, version, &bundle.text).await {
            tracing::error!(namespace = %namespace, version = %version, error = %e, "bundle push failed");
            let current = self.store.require(namespace, version)?.status;
            if current.can_transition_to(BundleStatus::Failed) {
                self.store.set_status(namespace, version, BundleStatus::Failed)?;
            }
            return Err(e.into());
        }

        let invalidated = self.cache.invalidate_superseded(namespace, version).await?;

        let previous = self.store.active(namespace)?.map(|r| r.version());
        if let Some(prev) = previous.filter(|p| *p != version) {
            self.store.set_status(namespace, prev, BundleStatus::Superseded)?;
        }
        self.store.set_status(namespace, version, BundleStatus::Active)?;
        self.active.set(Arc::clone(bundle));
        if let Err(e) = self.cache.put_bundle(Arc::clone(bundle)).await {
            tracing::warn!(namespace = %namespace, version = %version, error = %e, "failed to cache bundle");
        }
        self.metrics.set_active_version(namespace, version);
        self.store.prune(namespace, self.config.store.retained_versions)?;
        tracing::info!(
            namespace = %namespace,
            version = %version,
            previous = ?previous,
            invalidated,
            rules = bundle.rule_count(),
            "bundle activated"
        );
        Ok(Activation {
            namespace: namespace.clone(),
            version,
            previous,
            invalidated,
        })
    }

    // -- Enforcement ----------------------------------------------------------

    /// Evaluate one request.
    pub async fn enforce(
        &self,
        request: &EnforcementRequest,
        context: &EnforcementContext,
    ) -> Result<EnforcementDecision, EngineError> {
        let decision = self.optimizer.enforce(request, context).await?;
        self.metrics.record_decision(&decision);
        Ok(decision)
    }

    // -- Queries --------------------------------------------------------------

    /// A stored bundle by version.
    pub async fn bundle(&self, namespace: &Namespace, version: BundleVersion) -> Result<Arc<CompiledBundle>, EngineError> {
        if let Some(b) = self.cache.get_bundle(namespace, version).await {
            return Ok(b);
        }
        Ok(Arc::new(self.store.require(namespace, version)?.bundle))
    }

    /// Manifest of the active bundle.
    pub fn manifest(&self, namespace: &Namespace) -> Result<CompilationManifest, EngineError> {
        self.store
            .active(namespace)?
            .map(|r| r.manifest)
            .ok_or_else(|| EngineError::NotFound(format!("active manifest for namespace {namespace}")))
    }

    /// Stored versions and their statuses.
    pub fn versions(&self, namespace: &Namespace) -> Result<Vec<(BundleVersion, BundleStatus)>, EngineError> {
        let mut out = Vec::new();
        for v in self.store.versions(namespace)? {
            if let Some(r) = self.store.get(namespace, v)? {
                out.push((v, r.status));
            }
        }
        Ok(out)
    }

    /// Conflicts from the namespace's last pipeline run.
    pub fn conflicts(&self, namespace: &Namespace) -> Vec<Conflict> {
        self.namespaces
            .get(namespace)
            .map(|s| s.conflicts.clone())
            .unwrap_or_default()
    }

    /// The current staged rule set.
    pub fn rules(&self, namespace: &Namespace) -> BTreeMap<RuleId, Rule> {
        self.namespaces
            .get(namespace)
            .map(|s| s.registry.working_set())
            .unwrap_or_default()
    }

    /// Escalations, optionally filtered.
    pub fn escalations(&self, namespace: Option<&Namespace>, state: Option<EscalationState>) -> Vec<EscalationRecord> {
        self.resolver.queue().list(namespace, state)
    }

    /// Whether the runtime answers health checks.
    pub async fn runtime_ready(&self) -> Result<(), EngineError> {
        Ok(self.runtime.health().await?)
    }

    /// Prometheus text exposition, with pulled gauges refreshed.
    pub async fn render_metrics(&self) -> Result<String, EngineError> {
        let stats = self.cache.stats().await;
        self.metrics.refresh(&stats, self.resolver.queue().open_count());
        Ok(self.metrics.encode()?)
    }
}

/// Bring `registry` in line with a patched rule set.
fn sync_registry(
    registry: &mut RuleRegistry,
    before: &BTreeMap<RuleId, Rule>,
    after: &BTreeMap<RuleId, Rule>,
) -> Result<(), ManifestError> {
    for id in before.keys().filter(|id| !after.contains_key(*id)) {
        registry.remove(id)?;
    }
    for (id, rule) in after {
        if before.get(id).map_or(true, |b| b.content_hash != rule.content_hash) {
            registry.upsert(rule.clone());
        }
    }
    Ok(())
}

fn blocked(conflicts: &[Conflict]) -> EngineError {
    let blocking: Vec<&Conflict> = conflicts.iter().filter(|c| c.is_blocking()).collect();
    EngineError::Blocked {
        conflict_ids: blocking.iter().map(|c| c.id.to_string()).collect(),
        description: blocking
            .iter()
            .map(|c| c.description.as_str())
            .collect::<Vec<_>>()
            .join("; "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgov_conflict::{ConflictSeverity, Patch};
    use cgov_runtime::FakeRuntime;
    use serde_json::json;

    const ALLOW_ADMINS: &str = "allow {\n    input.user.role == \"admin\"\n}";
    const ALLOW_CONTRACTORS: &str = "allow {\n    input.requester.category == \"contractor\"\n}";
    const DENY_NIGHT_CONTRACTORS: &str =
        "deny {\n    input.requester.category == \"contractor\"\n    input.request.hour >= 22\n}";

    fn ns() -> Namespace {
        Namespace::new("ops").unwrap()
    }

    fn id(s: &str) -> RuleId {
        RuleId::new(s).unwrap()
    }

    fn engine_with(runtime: Arc<FakeRuntime>, store: SharedStore) -> Engine {
        Engine::new(EngineConfig::default(), runtime, store, FactEvaluator::empty()).unwrap()
    }

    fn engine() -> (Engine, Arc<FakeRuntime>) {
        let runtime = Arc::new(FakeRuntime::allow_all());
        let store: SharedStore = Arc::new(MemoryStore::<CompiledBundle>::new());
        (engine_with(Arc::clone(&runtime), store), runtime)
    }

    fn submit(rules: &[(&str, u32, &str)]) -> CompileBatch {
        CompileBatch {
            upserts: rules
                .iter()
                .map(|(rid, priority, src)| RuleSubmission::new(id(rid), *src).priority(*priority))
                .collect(),
            removals: Vec::new(),
        }
    }

    fn contractor_pair(p1: u32, p2: u32) -> CompileBatch {
        submit(&[("allow-contractors", p1, ALLOW_CONTRACTORS), ("deny-contractors", p2, DENY_NIGHT_CONTRACTORS)])
    }

    #[tokio::test]
    async fn compile_pushes_and_activates() {
        let (engine, runtime) = engine();
        let report = engine.compile(&ns(), submit(&[("allow-admins", 1, ALLOW_ADMINS)])).await.unwrap();
        assert!(report.is_active());
        assert_eq!(report.bundle_version, BundleVersion::INITIAL);
        assert_eq!(report.mode.as_str(), "full");
        assert!(report.error.is_none());
        assert_eq!(runtime.pushed(&ns()).unwrap().0, BundleVersion::INITIAL);
        assert_eq!(engine.manifest(&ns()).unwrap().rule_count, 1);

        let decision = engine
            .enforce(
                &EnforcementRequest::new(ns(), json!({"user": {"role": "admin"}})),
                &EnforcementContext::default(),
            )
            .await
            .unwrap();
        assert!(decision.allow);
        assert_eq!(decision.bundle_version, BundleVersion::INITIAL);
    }

    #[tokio::test]
    async fn unchanged_batch_reuses_active_bundle() {
        let (engine, _) = engine();
        engine.compile(&ns(), submit(&[("allow-admins", 1, ALLOW_ADMINS)])).await.unwrap();
        let again = engine.compile(&ns(), submit(&[("allow-admins", 1, ALLOW_ADMINS)])).await.unwrap();
        assert!(again.reused);
        assert!(again.is_active());
        assert_eq!(again.bundle_version, BundleVersion::INITIAL);
        assert_eq!(engine.versions(&ns()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn small_change_rebuilds_partially() {
        let (engine, _) = engine();
        let rules: Vec<(String, String)> = (0..5)
            .map(|i| (format!("r{i}"), format!("allow {{\n    input.level == {i}\n}}")))
            .collect();
        let batch = CompileBatch {
            upserts: rules
                .iter()
                .map(|(rid, src)| RuleSubmission::new(id(rid), src.as_str()))
                .collect(),
            removals: Vec::new(),
        };
        engine.compile(&ns(), batch).await.unwrap();

        let change = CompileBatch {
            upserts: vec![RuleSubmission::new(id("r2"), "allow {\n    input.level == 20\n}")],
            removals: Vec::new(),
        };
        let report = engine.compile(&ns(), change).await.unwrap();
        assert_eq!(report.bundle_version, BundleVersion(2));
        assert_eq!(report.mode.as_str(), "partial");
        assert_eq!(report.affected, vec![id("r2")]);
        assert!(report.is_active());
    }

    #[tokio::test]
    async fn removal_of_unknown_rule_is_rejected() {
        let (engine, _) = engine();
        let batch = CompileBatch {
            upserts: Vec::new(),
            removals: vec![id("ghost")],
        };
        let err = engine.compile(&ns(), batch).await.unwrap_err();
        assert!(matches!(err, EngineError::Manifest(ManifestError::RuleNotFound(_))));
    }

    #[tokio::test]
    async fn undetectable_payload_rejects_whole_batch() {
        let (engine, runtime) = engine();
        let batch = CompileBatch {
            upserts: vec![
                RuleSubmission::new(id("good"), ALLOW_ADMINS),
                RuleSubmission::new(id("bad"), json!([1, 2, 3])),
            ],
            removals: Vec::new(),
        };
        let err = engine.compile(&ns(), batch).await.unwrap_err();
        assert!(matches!(err, EngineError::Format { ref rule, .. } if rule == "bad"));
        assert!(engine.rules(&ns()).is_empty());
        assert!(runtime.pushed(&ns()).is_none());
    }

    #[tokio::test]
    async fn priority_gap_is_patched_and_activated() {
        let (engine, _) = engine();
        let report = engine.compile(&ns(), contractor_pair(1, 9)).await.unwrap();
        assert!(report.is_active());
        assert_eq!(report.resolution.patches.len(), 1);
        let loser = &engine.rules(&ns())[&id("allow-contractors")];
        assert_eq!(loser.overrides, vec![id("deny-contractors")]);
    }

    #[tokio::test]
    async fn blocking_conflict_keeps_previous_bundle_serving() {
        let (engine, runtime) = engine();
        engine.compile(&ns(), submit(&[("allow-admins", 1, ALLOW_ADMINS)])).await.unwrap();

        let report = engine.compile(&ns(), contractor_pair(5, 5)).await.unwrap();
        assert_eq!(report.status, BundleStatus::BlockedByConflict);
        assert_eq!(report.bundle_version, BundleVersion(2));
        assert!(report.error.as_deref().unwrap().contains("blocked"));
        assert_eq!(report.conflicts[0].severity, ConflictSeverity::Blocking);
        assert_eq!(engine.optimizer().active_version(&ns()), Some(BundleVersion::INITIAL));
        assert_eq!(runtime.pushed(&ns()).unwrap().0, BundleVersion::INITIAL);
        assert_eq!(engine.escalations(Some(&ns()), Some(EscalationState::Open)).len(), 1);

        let err = engine.activate(&ns()).await.unwrap_err();
        assert!(matches!(err, EngineError::Blocked { ref conflict_ids, .. } if conflict_ids.len() == 1));
    }

    #[tokio::test]
    async fn dismissed_escalation_activates_blocked_bundle() {
        let (engine, _) = engine();
        let report = engine.compile(&ns(), contractor_pair(5, 5)).await.unwrap();
        let escalation = report.resolution.escalations[0].id;

        let outcome = engine
            .resolve_escalation(
                escalation,
                HumanResolution::Dismiss {
                    reason: "night shift contractors are expected".into(),
                },
                "alice",
            )
            .await
            .unwrap();
        assert_eq!(outcome.escalation.state, EscalationState::Dismissed);
        assert!(outcome.compile.is_active());
        assert!(outcome.compile.reused);
        assert_eq!(outcome.compile.bundle_version, BundleVersion::INITIAL);
        assert_eq!(engine.escalation_queue().open_count(), 0);
    }

    #[tokio::test]
    async fn unappliable_patch_keeps_escalation_open() {
        let (engine, _) = engine();
        let report = engine.compile(&ns(), contractor_pair(5, 5)).await.unwrap();
        let escalation = report.resolution.escalations[0].id;

        let err = engine
            .resolve_escalation(
                escalation,
                HumanResolution::ApplyPatch {
                    patch: Patch::AddOverride {
                        rule: id("allow-contractors"),
                        winner: id("no-such-rule"),
                    },
                },
                "alice",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(ConflictError::PatchTarget(_))));
        assert_eq!(engine.escalation_queue().get(escalation).unwrap().state, EscalationState::Open);
        assert_eq!(engine.escalation_queue().open_count(), 1);
        assert!(matches!(engine.activate(&ns()).await.unwrap_err(), EngineError::Blocked { .. }));
        assert!(engine.rules(&ns())[&id("allow-contractors")].overrides.is_empty());
    }

    #[tokio::test]
    async fn failed_push_discards_staged_changes() {
        let (engine, runtime) = engine();
        engine.compile(&ns(), submit(&[("allow-admins", 1, ALLOW_ADMINS)])).await.unwrap();

        runtime.reject_pushes(true);
        let err = engine
            .compile(&ns(), submit(&[("allow-contractors", 1, ALLOW_CONTRACTORS)]))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Runtime(_)));
        assert_eq!(engine.optimizer().active_version(&ns()), Some(BundleVersion::INITIAL));
        assert!(!engine.rules(&ns()).contains_key(&id("allow-contractors")));
        let versions = engine.versions(&ns()).unwrap();
        assert_eq!(versions.last(), Some(&(BundleVersion(2), BundleStatus::Failed)));

        runtime.reject_pushes(false);
        let report = engine
            .compile(&ns(), submit(&[("allow-contractors", 1, ALLOW_CONTRACTORS)]))
            .await
            .unwrap();
        assert!(report.is_active());
        assert_eq!(report.bundle_version, BundleVersion(3));
    }

    #[tokio::test]
    async fn rollback_restores_previous_rules() {
        let (engine, runtime) = engine();
        engine.compile(&ns(), submit(&[("allow-admins", 1, ALLOW_ADMINS)])).await.unwrap();
        engine
            .compile(&ns(), submit(&[("allow-contractors", 1, ALLOW_CONTRACTORS)]))
            .await
            .unwrap();

        let activation = engine.rollback(&ns(), BundleVersion::INITIAL).await.unwrap();
        assert_eq!(activation.version, BundleVersion::INITIAL);
        assert_eq!(activation.previous, Some(BundleVersion(2)));
        assert_eq!(runtime.pushed(&ns()).unwrap().0, BundleVersion::INITIAL);
        assert_eq!(engine.rules(&ns()).len(), 1);
        let versions = engine.versions(&ns()).unwrap();
        assert_eq!(
            versions,
            vec![
                (BundleVersion::INITIAL, BundleStatus::Active),
                (BundleVersion(2), BundleStatus::Superseded)
            ]
        );

        let err = engine.rollback(&ns(), BundleVersion(9)).await.unwrap_err();
        assert!(matches!(err, EngineError::Manifest(ManifestError::VersionNotFound { .. })));
    }

    #[tokio::test]
    async fn partial_build_after_rollback_matches_full_build() {
        let (engine, _) = engine();
        let level = |rid: &str, n: u32| RuleSubmission::new(id(rid), format!("allow {{\n    input.level == {n}\n}}").as_str());
        let batch = CompileBatch {
            upserts: (0..6).map(|i| level(&format!("r{i}"), i)).collect(),
            removals: Vec::new(),
        };
        engine.compile(&ns(), batch).await.unwrap();
        let one = |rid: &str, n: u32| CompileBatch {
            upserts: vec![level(rid, n)],
            removals: Vec::new(),
        };
        engine.compile(&ns(), one("r0", 40)).await.unwrap();
        engine.rollback(&ns(), BundleVersion::INITIAL).await.unwrap();

        let report = engine.compile(&ns(), one("r5", 50)).await.unwrap();
        assert_eq!(report.mode.as_str(), "partial");
        let partial = engine.bundle(&ns(), report.bundle_version).await.unwrap();
        let full = IncrementalCompiler::new(cgov_compiler::CompilerConfig::default())
            .unwrap()
            .compile_full(&ns(), &engine.rules(&ns()), report.bundle_version)
            .unwrap();
        assert_eq!(partial.text, full.bundle.text);
        assert_eq!(partial.fragments, full.bundle.fragments);
    }

    #[tokio::test]
    async fn rollback_to_blocked_version_is_rejected() {
        let (engine, _) = engine();
        engine.compile(&ns(), contractor_pair(5, 5)).await.unwrap();
        let err = engine.rollback(&ns(), BundleVersion::INITIAL).await.unwrap_err();
        assert!(matches!(err, EngineError::Manifest(ManifestError::Transition(_))));
    }

    #[tokio::test]
    async fn recover_reloads_active_versions_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = || -> SharedStore { Arc::new(FsStore::new(dir.path())) };
        let first = engine_with(Arc::new(FakeRuntime::allow_all()), store());
        first.compile(&ns(), submit(&[("allow-admins", 1, ALLOW_ADMINS)])).await.unwrap();

        let runtime = Arc::new(FakeRuntime::allow_all());
        let second = engine_with(Arc::clone(&runtime), store());
        assert_eq!(second.recover().await.unwrap(), 1);
        assert_eq!(second.optimizer().active_version(&ns()), Some(BundleVersion::INITIAL));
        assert_eq!(runtime.pushed(&ns()).unwrap().0, BundleVersion::INITIAL);
        assert_eq!(second.rules(&ns()).len(), 1);

        let report = second
            .compile(&ns(), submit(&[("allow-contractors", 1, ALLOW_CONTRACTORS)]))
            .await
            .unwrap();
        assert_eq!(report.bundle_version, BundleVersion(2));
    }

    #[tokio::test]
    async fn recover_refuses_tampered_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let store = || -> SharedStore { Arc::new(FsStore::new(dir.path())) };
        let first = engine_with(Arc::new(FakeRuntime::allow_all()), store());
        first.compile(&ns(), submit(&[("allow-admins", 1, ALLOW_ADMINS)])).await.unwrap();

        let path = dir.path().join("ops").join(format!("{:020}.json", 1));
        let raw = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, raw.replace("package cgov.ops", "package cgov.evil")).unwrap();

        let runtime = Arc::new(FakeRuntime::allow_all());
        let second = engine_with(Arc::clone(&runtime), store());
        assert!(second.recover().await.is_err());
        assert!(runtime.pushed(&ns()).is_none());
        assert_eq!(second.optimizer().active_version(&ns()), None);
    }

    #[tokio::test]
    async fn metrics_exposition_reflects_activity() {
        let (engine, _) = engine();
        engine.compile(&ns(), submit(&[("allow-admins", 1, ALLOW_ADMINS)])).await.unwrap();
        engine
            .enforce(&EnforcementRequest::new(ns(), json!({})), &EnforcementContext::default())
            .await
            .unwrap();
        let text = engine.render_metrics().await.unwrap();
        assert!(text.contains("cgov_active_bundle_version"));
        assert!(text.contains("cgov_decisions_total"));
        assert!(text.contains("cgov_compile_duration_seconds"));
    }
}
