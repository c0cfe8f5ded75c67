//! The enforcement path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cgov_cache::{decision_fingerprint, CacheError, CachedDecision, MultiTierCache};
use cgov_compiler::CompiledBundle;
use cgov_core::{BundleVersion, Namespace, RuleId};
use cgov_facts::{parse_goal, Atom, FactEvaluator};
use cgov_runtime::{FailureMode, PolicyRuntime, RuntimeDecision};
use parking_lot::Mutex;

use crate::active::ActiveBundles;
use crate::adaptive::{AdaptiveSelector, StrategySwitch};
use crate::config::EnforcementConfig;
use crate::decision::{EnforcementContext, EnforcementDecision, EnforcementRequest};
use crate::error::EnforcementError;
use crate::strategy::{priority_weighted, StrategyKind};
use crate::window::{Sample, WindowStats};

/// Field of the runtime input that carries derived context.
pub const FACTS_FIELD: &str = "facts";

/// Chooses a strategy per request, serves from the cache where it can and
/// otherwise asks the runtime.
pub struct EnforcementOptimizer {
    config: EnforcementConfig,
    runtime: Arc<dyn PolicyRuntime>,
    cache: Arc<MultiTierCache>,
    facts: Arc<FactEvaluator>,
    active: Arc<ActiveBundles>,
    goals: Vec<(String, Atom)>,
    essential: Vec<(String, Atom)>,
    selector: Mutex<AdaptiveSelector>,
}

impl std::fmt::Debug for EnforcementOptimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnforcementOptimizer")
            .field("config", &self.config)
            .field("goals", &self.goals.len())
            .field("strategy", &self.selector.lock().current())
            .finish()
    }
}

/// Runtime answer before the failure policy is applied.
type Evaluated = Result<RuntimeDecision, String>;

impl EnforcementOptimizer {
    /// Build an optimizer. Context goals are parsed once here.
    pub fn new(
        config: EnforcementConfig,
        runtime: Arc<dyn PolicyRuntime>,
        cache: Arc<MultiTierCache>,
        facts: Arc<FactEvaluator>,
        active: Arc<ActiveBundles>,
    ) -> Result<Self, EnforcementError> {
        config.validate()?;
        let goals = config
            .context_goals
            .iter()
            .map(|(name, src)| {
                parse_goal(src)
                    .map(|atom| (name.clone(), atom))
                    .map_err(|source| EnforcementError::Goal {
                        name: name.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let essential = goals
            .iter()
            .filter(|(name, _)| config.essential_goals.contains(name))
            .cloned()
            .collect();
        Ok(Self {
            selector: Mutex::new(AdaptiveSelector::new(config.adaptive.clone())),
            config,
            runtime,
            cache,
            facts,
            active,
            goals,
            essential,
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &EnforcementConfig {
        &self.config
    }

    /// The active-bundle registry this optimizer reads.
    pub fn active(&self) -> &Arc<ActiveBundles> {
        &self.active
    }

    /// Rolling window aggregates.
    pub fn window_stats(&self) -> WindowStats {
        self.selector.lock().stats()
    }

    /// Strategy the adaptive selector currently prefers.
    pub fn adaptive_state(&self) -> StrategyKind {
        self.selector.lock().current()
    }

    /// Recent adaptive switches, oldest first.
    pub fn strategy_switches(&self) -> Vec<StrategySwitch> {
        self.selector.lock().switches().cloned().collect()
    }

    fn concrete(&self, requested: StrategyKind) -> StrategyKind {
        match requested {
            StrategyKind::Adaptive => self.selector.lock().current(),
            other => other,
        }
    }

    /// Evaluate `request` with the configured default strategy.
    pub async fn enforce(
        &self,
        request: &EnforcementRequest,
        context: &EnforcementContext,
    ) -> Result<EnforcementDecision, EnforcementError> {
        self.enforce_with(request, context, self.config.default_strategy).await
    }

    /// Evaluate `request` with `strategy`.
    pub async fn enforce_with(
        &self,
        request: &EnforcementRequest,
        context: &EnforcementContext,
        strategy: StrategyKind,
    ) -> Result<EnforcementDecision, EnforcementError> {
        let started = Instant::now();
        let ns = &request.namespace;
        let bundle = self
            .active
            .get(ns)
            .ok_or_else(|| EnforcementError::NoActiveBundle(ns.clone()))?;
        let strategy = self.concrete(strategy);
        let fingerprint = decision_fingerprint(ns, request.category.as_deref(), &request.input);

        if self.config.cache_decisions {
            match self.cache.get_decision(ns, fingerprint, bundle.version).await {
                Ok(Some((cached, tier))) => {
                    let allow = if strategy == StrategyKind::PriorityWeighted && has_trace(&cached) {
                        priority_weighted(&bundle, &cached.allow_matches, &cached.deny_matches)
                    } else {
                        cached.allow
                    };
                    return Ok(EnforcementDecision {
                        allow,
                        allow_matches: cached.allow_matches,
                        deny_matches: cached.deny_matches,
                        cache_hit: true,
                        cache_tier: Some(tier),
                        strategy,
                        bundle_version: bundle.version,
                        latency_micros: elapsed_micros(started),
                        failure_reason: None,
                        failure_mode: None,
                    });
                }
                Ok(None) => {}
                Err(e @ CacheError::Inconsistency { .. }) => {
                    tracing::error!(namespace = %ns, error = %e, "stale decision dropped, re-evaluating");
                }
                Err(e) => {
                    tracing::warn!(namespace = %ns, error = %e, "decision cache unavailable");
                }
            }
        }

        let evaluated = self.evaluate(request, context, strategy).await;
        let latency = started.elapsed();
        let decision = match evaluated {
            Ok(runtime) => self.decided(&bundle, request, strategy, runtime, fingerprint, latency).await,
            Err(reason) => self.failed(&bundle, request, context, strategy, reason, latency),
        };
        Ok(decision)
    }

    /// Derive context and ask the runtime under the caller's deadline.
    async fn evaluate(
        &self,
        request: &EnforcementRequest,
        context: &EnforcementContext,
        strategy: StrategyKind,
    ) -> Evaluated {
        let ns = &request.namespace;
        let goals = if strategy.essential_context_only() {
            &self.essential
        } else {
            &self.goals
        };
        let mut input = request.input.clone();
        if !goals.is_empty() {
            let derived = self
                .facts
                .derive_context(&request.input, goals)
                .map_err(|e| format!("context derivation failed: {e}"))?;
            match input.as_object_mut() {
                Some(obj) => {
                    obj.insert(FACTS_FIELD.to_string(), derived);
                }
                None => tracing::debug!(namespace = %ns, "non-object input, derived context not attached"),
            }
        }

        let deadline = context
            .deadline
            .unwrap_or(Duration::from_millis(self.config.default_deadline_ms));
        let per_call = (strategy == StrategyKind::LatencyOptimized)
            .then(|| Duration::from_millis(self.config.latency_timeout_ms));
        match tokio::time::timeout(deadline, self.runtime.query(ns, &input, per_call)).await {
            Ok(Ok(decision)) => Ok(decision),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("deadline of {} ms exceeded", deadline.as_millis())),
        }
    }

    async fn decided(
        &self,
        bundle: &CompiledBundle,
        request: &EnforcementRequest,
        strategy: StrategyKind,
        runtime: RuntimeDecision,
        fingerprint: cgov_core::ContentDigest,
        latency: Duration,
    ) -> EnforcementDecision {
        let allow_matches = rule_ids(&runtime.allow_matches);
        let deny_matches = rule_ids(&runtime.deny_matches);
        let allow = match strategy {
            StrategyKind::PriorityWeighted => priority_weighted(bundle, &allow_matches, &deny_matches),
            _ => runtime.allow,
        };

        self.record(bundle, request, &allow_matches, &deny_matches, latency);

        // A decision from a bundle superseded while the runtime call was in
        // flight is returned but never stored.
        let current = || self.active.version(&request.namespace) == Some(bundle.version);
        if self.config.cache_decisions && current() {
            let (cached_allow, cached_deny) = if strategy.caches_trace() {
                (allow_matches.clone(), deny_matches.clone())
            } else {
                (Vec::new(), Vec::new())
            };
            let cached = CachedDecision {
                allow,
                allow_matches: cached_allow,
                deny_matches: cached_deny,
                bundle_version: bundle.version,
                strategy: strategy.as_str().to_string(),
            };
            if let Err(e) = self.cache.put_decision(&request.namespace, fingerprint, cached).await {
                tracing::warn!(namespace = %request.namespace, error = %e, "failed to cache decision");
            }
            if let Some(active) = self.active.version(&request.namespace).filter(|_| !current()) {
                if let Err(e) = self.cache.invalidate_superseded(&request.namespace, active).await {
                    tracing::warn!(namespace = %request.namespace, error = %e, "failed to drop superseded decision");
                }
            }
        } else if self.config.cache_decisions {
            tracing::debug!(
                namespace = %request.namespace,
                version = %bundle.version,
                "bundle superseded during evaluation, decision not cached"
            );
        }

        tracing::debug!(
            namespace = %request.namespace,
            version = %bundle.version,
            strategy = %strategy,
            allow,
            latency_ms = latency.as_secs_f64() * 1000.0,
            "request evaluated"
        );
        EnforcementDecision {
            allow,
            allow_matches,
            deny_matches,
            cache_hit: false,
            cache_tier: None,
            strategy,
            bundle_version: bundle.version,
            latency_micros: latency.as_micros() as u64,
            failure_reason: None,
            failure_mode: None,
        }
    }

    fn failed(
        &self,
        bundle: &CompiledBundle,
        request: &EnforcementRequest,
        context: &EnforcementContext,
        strategy: StrategyKind,
        reason: String,
        latency: Duration,
    ) -> EnforcementDecision {
        let mode = self.runtime.retry_policy().failure.mode_for(context.safety_critical);
        self.record(bundle, request, &[], &[], latency);
        match mode {
            FailureMode::FailClosed => tracing::error!(
                namespace = %request.namespace,
                requester = context.requester.as_deref().unwrap_or("-"),
                reason = %reason,
                "runtime unavailable, failing closed"
            ),
            FailureMode::FailOpen => tracing::warn!(
                namespace = %request.namespace,
                requester = context.requester.as_deref().unwrap_or("-"),
                reason = %reason,
                "runtime unavailable, failing open"
            ),
        }
        EnforcementDecision {
            allow: mode.allows(),
            allow_matches: Vec::new(),
            deny_matches: Vec::new(),
            cache_hit: false,
            cache_tier: None,
            strategy,
            bundle_version: bundle.version,
            latency_micros: latency.as_micros() as u64,
            failure_reason: Some(reason),
            failure_mode: Some(mode),
        }
    }

    fn record(
        &self,
        bundle: &CompiledBundle,
        request: &EnforcementRequest,
        allow_matches: &[RuleId],
        deny_matches: &[RuleId],
        latency: Duration,
    ) {
        let adaptive = &self.config.adaptive;
        let by_category = request
            .category
            .as_ref()
            .is_some_and(|c| adaptive.high_priority_categories.contains(c));
        let by_rule = allow_matches
            .iter()
            .chain(deny_matches)
            .any(|id| bundle.priority_of(id.as_str()) >= adaptive.high_priority_threshold);
        self.selector.lock().record(Sample {
            latency_ms: latency.as_secs_f64() * 1000.0,
            high_priority: by_category || by_rule,
        });
    }

    /// Active version for `namespace`.
    pub fn active_version(&self, namespace: &Namespace) -> Option<BundleVersion> {
        self.active.version(namespace)
    }
}

fn has_trace(d: &CachedDecision) -> bool {
    !d.allow_matches.is_empty() || !d.deny_matches.is_empty()
}

fn rule_ids(raw: &[String]) -> Vec<RuleId> {
    raw.iter()
        .filter_map(|s| match RuleId::new(s.as_str()) {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::debug!(rule = %s, error = %e, "runtime reported an unknown rule id");
                None
            }
        })
        .collect()
}

fn elapsed_micros(started: Instant) -> u64 {
    started.elapsed().as_micros() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgov_cache::{CacheConfig, Tier};
    use cgov_compiler::{CompilerConfig, IncrementalCompiler};
    use cgov_core::lang::parse_rule;
    use cgov_core::{Rule, SourceFormat};
    use cgov_facts::FactsConfig;
    use cgov_runtime::FakeRuntime;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;

    fn ns() -> Namespace {
        Namespace::new("ops").unwrap()
    }

    fn bundle(version: u64) -> Arc<CompiledBundle> {
        let rules: BTreeMap<RuleId, Rule> = [
            ("allow-staff", 1, "allow {\n    input.role == \"staff\"\n}"),
            ("deny-night", 20, "deny {\n    input.hour >= 22\n}"),
        ]
        .into_iter()
        .map(|(id, p, src)| {
            let r = Rule::builder(RuleId::new(id).unwrap(), SourceFormat::Canonical, parse_rule(src).unwrap())
                .priority(p)
                .build()
                .unwrap();
            (r.id.clone(), r)
        })
        .collect();
        let out = IncrementalCompiler::new(CompilerConfig::default())
            .unwrap()
            .compile_full(&ns(), &rules, BundleVersion(version))
            .unwrap();
        Arc::new(out.bundle)
    }

    /// A runtime that allows staff and reports both rules when it is night.
    fn runtime() -> Arc<FakeRuntime> {
        Arc::new(FakeRuntime::new(|_, input| {
            let staff = input["role"] == "staff";
            let night = input["hour"].as_i64().unwrap_or(0) >= 22;
            RuntimeDecision {
                allow: staff && !night,
                allow_matches: if staff { vec!["allow-staff".into()] } else { vec![] },
                deny_matches: if night { vec!["deny-night".into()] } else { vec![] },
            }
        }))
    }

    async fn setup(config: EnforcementConfig, facts: FactEvaluator) -> (EnforcementOptimizer, Arc<FakeRuntime>) {
        let rt = runtime();
        let b = bundle(1);
        rt.push_bundle(&ns(), b.version, &b.text).await.unwrap();
        let active = Arc::new(ActiveBundles::new());
        active.set(b);
        let opt = EnforcementOptimizer::new(
            config,
            rt.clone(),
            Arc::new(MultiTierCache::in_memory(CacheConfig::default())),
            Arc::new(facts),
            active,
        )
        .unwrap();
        (opt, rt)
    }

    fn req(input: Value) -> EnforcementRequest {
        EnforcementRequest::new(ns(), input)
    }

    #[tokio::test]
    async fn miss_then_hit() {
        let (opt, rt) = setup(EnforcementConfig::default(), FactEvaluator::empty()).await;
        let r = req(json!({"role": "staff", "hour": 9}));
        let first = opt.enforce(&r, &EnforcementContext::default()).await.unwrap();
        assert!(first.allow);
        assert!(!first.cache_hit);
        assert_eq!(first.allow_matches, vec![RuleId::new("allow-staff").unwrap()]);

        let second = opt.enforce(&r, &EnforcementContext::default()).await.unwrap();
        assert!(second.cache_hit);
        assert_eq!(second.cache_tier, Some(Tier::Hot));
        assert!(second.allow);
        assert_eq!(rt.query_attempts(), 1);
    }

    #[tokio::test]
    async fn safety_critical_runtime_outage_fails_closed() {
        let (opt, rt) = setup(EnforcementConfig::default(), FactEvaluator::empty()).await;
        rt.fail_next(3);
        let d = opt
            .enforce(&req(json!({"role": "staff", "hour": 9})), &EnforcementContext::safety_critical())
            .await
            .unwrap();
        assert!(!d.allow);
        assert_eq!(d.failure_mode, Some(FailureMode::FailClosed));
        assert!(d.failure_reason.as_deref().unwrap().contains("503"));
        assert_eq!(rt.query_attempts(), 2);
        assert_eq!(d.outcome(), "fail_closed");
    }

    #[tokio::test]
    async fn non_critical_outage_fails_open_and_is_not_cached() {
        let (opt, rt) = setup(EnforcementConfig::default(), FactEvaluator::empty()).await;
        rt.fail_next(2);
        let r = req(json!({"role": "guest", "hour": 9}));
        let d = opt.enforce(&r, &EnforcementContext::default()).await.unwrap();
        assert!(d.allow);
        assert!(d.is_failure());

        let again = opt.enforce(&r, &EnforcementContext::default()).await.unwrap();
        assert!(!again.cache_hit);
        assert!(!again.allow);
        assert!(!again.is_failure());
    }

    #[tokio::test]
    async fn deadline_counts_as_failure() {
        let (opt, rt) = setup(EnforcementConfig::default(), FactEvaluator::empty()).await;
        rt.set_delay_ms(200);
        let ctx = EnforcementContext::safety_critical().with_deadline(Duration::from_millis(10));
        let d = opt.enforce(&req(json!({"role": "staff"})), &ctx).await.unwrap();
        assert!(!d.allow);
        assert!(d.failure_reason.unwrap().contains("deadline"));
    }

    #[tokio::test]
    async fn priority_weighting_uses_rule_priorities() {
        let (opt, _) = setup(EnforcementConfig::default(), FactEvaluator::empty()).await;
        let r = req(json!({"role": "staff", "hour": 23}));
        let d = opt
            .enforce_with(&r, &EnforcementContext::default(), StrategyKind::PriorityWeighted)
            .await
            .unwrap();
        assert_eq!(d.strategy, StrategyKind::PriorityWeighted);
        assert!(!d.allow);
        assert_eq!(d.deny_matches.len(), 1);
    }

    #[tokio::test]
    async fn stale_entry_is_re_evaluated() {
        let (opt, rt) = setup(EnforcementConfig::default(), FactEvaluator::empty()).await;
        let r = req(json!({"role": "staff", "hour": 9}));
        opt.enforce(&r, &EnforcementContext::default()).await.unwrap();

        // Activate v2 without invalidating: the v1 entry must not be served.
        let b2 = bundle(2);
        rt.push_bundle(&ns(), b2.version, &b2.text).await.unwrap();
        opt.active().set(b2);
        let d = opt.enforce(&r, &EnforcementContext::default()).await.unwrap();
        assert!(!d.cache_hit);
        assert_eq!(d.bundle_version, BundleVersion(2));
        assert_eq!(rt.query_attempts(), 2);
    }

    #[tokio::test]
    async fn unknown_namespace_is_an_error() {
        let (opt, _) = setup(EnforcementConfig::default(), FactEvaluator::empty()).await;
        let r = EnforcementRequest::new(Namespace::new("nope").unwrap(), json!({}));
        assert!(matches!(
            opt.enforce(&r, &EnforcementContext::default()).await,
            Err(EnforcementError::NoActiveBundle(_))
        ));
    }

    #[tokio::test]
    async fn derived_context_reaches_the_runtime() {
        let facts = FactEvaluator::from_source(
            FactsConfig::default(),
            "senior(\"staff\").\nqualified :- input(\"role\", R), senior(R).",
        )
        .unwrap();
        let mut config = EnforcementConfig::default();
        config.context_goals.insert("qualified".into(), "qualified".into());
        let rt = Arc::new(FakeRuntime::new(|_, input| RuntimeDecision {
            allow: input["facts"]["qualified"] == json!(true),
            ..RuntimeDecision::default()
        }));
        let b = bundle(1);
        rt.push_bundle(&ns(), b.version, &b.text).await.unwrap();
        let active = Arc::new(ActiveBundles::new());
        active.set(b);
        let opt = EnforcementOptimizer::new(
            config,
            rt,
            Arc::new(MultiTierCache::in_memory(CacheConfig::default())),
            Arc::new(facts),
            active,
        )
        .unwrap();
        let ctx = EnforcementContext::default();
        assert!(opt.enforce(&req(json!({"role": "staff"})), &ctx).await.unwrap().allow);
        assert!(!opt.enforce(&req(json!({"role": "guest"})), &ctx).await.unwrap().allow);
    }

    #[test]
    fn bad_goal_is_rejected() {
        let mut config = EnforcementConfig::default();
        config.context_goals.insert("broken".into(), "p(".into());
        let err = EnforcementOptimizer::new(
            config,
            Arc::new(FakeRuntime::allow_all()),
            Arc::new(MultiTierCache::in_memory(CacheConfig::default())),
            Arc::new(FactEvaluator::empty()),
            Arc::new(ActiveBundles::new()),
        )
        .unwrap_err();
        assert!(matches!(err, EnforcementError::Goal { .. }));
    }

    #[tokio::test]
    async fn decision_in_flight_across_activation_is_not_cached() {
        let rt = runtime();
        let v1 = bundle(1);
        rt.push_bundle(&ns(), v1.version, &v1.text).await.unwrap();
        let active = Arc::new(ActiveBundles::new());
        active.set(v1);
        let cache = Arc::new(MultiTierCache::in_memory(CacheConfig::default()));
        let opt = Arc::new(
            EnforcementOptimizer::new(
                EnforcementConfig::default(),
                rt.clone(),
                Arc::clone(&cache),
                Arc::new(FactEvaluator::empty()),
                Arc::clone(&active),
            )
            .unwrap(),
        );
        let ctx = EnforcementContext {
            deadline: Some(Duration::from_secs(5)),
            ..EnforcementContext::default()
        };

        rt.set_delay_ms(200);
        let in_flight = {
            let opt = Arc::clone(&opt);
            let ctx = ctx.clone();
            tokio::spawn(async move { opt.enforce(&req(json!({"role": "staff", "hour": 9})), &ctx).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let v2 = bundle(2);
        cache.invalidate_superseded(&ns(), v2.version).await.unwrap();
        active.set(v2);

        let first = in_flight.await.unwrap().unwrap();
        assert_eq!(first.bundle_version, BundleVersion(1));

        rt.set_delay_ms(0);
        let next = opt.enforce(&req(json!({"role": "staff", "hour": 9})), &ctx).await.unwrap();
        assert!(!next.cache_hit);
        assert_eq!(next.bundle_version, BundleVersion(2));
        assert_eq!(cache.stats().await.inconsistencies, 0);
    }
}
