//! # Prometheus Metrics
//!
//! Request-path and pipeline metrics are recorded as events happen. Cache
//! gauges are refreshed from [`CacheStats`] on each scrape.

use std::sync::Arc;
use std::time::Duration;

use cgov_cache::CacheStats;
use cgov_compiler::CompiledBundle;
use cgov_conflict::Conflict;
use cgov_core::{BundleVersion, Namespace};
use cgov_enforcement::EnforcementDecision;
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

/// Engine metrics backed by a private registry.
#[derive(Clone)]
pub struct EngineMetrics {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Registry,
    enforcement_latency: HistogramVec,
    decisions: IntCounterVec,
    cache_hit_ratio: GaugeVec,
    cache_inconsistencies: IntGauge,
    conflicts: IntCounterVec,
    compile_duration: HistogramVec,
    active_version: IntGaugeVec,
    escalations_open: IntGauge,
}

impl std::fmt::Debug for EngineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineMetrics")
            .field("families", &self.inner.registry.gather().len())
            .finish()
    }
}

impl EngineMetrics {
    /// Create and register every metric.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let enforcement_latency = HistogramVec::new(
            HistogramOpts::new("cgov_enforcement_latency_seconds", "Enforcement latency by strategy")
                .buckets(vec![0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
            &["strategy"],
        )?;
        let decisions = IntCounterVec::new(
            Opts::new("cgov_decisions_total", "Enforcement decisions by outcome"),
            &["outcome", "cache"],
        )?;
        let cache_hit_ratio = GaugeVec::new(
            Opts::new("cgov_cache_hit_ratio", "Cache hit ratio per tier"),
            &["tier"],
        )?;
        let cache_inconsistencies = IntGauge::new(
            "cgov_cache_inconsistencies",
            "Stale decisions detected after activation",
        )?;
        let conflicts = IntCounterVec::new(
            Opts::new("cgov_conflicts_total", "Conflicts detected by severity"),
            &["severity"],
        )?;
        let compile_duration = HistogramVec::new(
            HistogramOpts::new("cgov_compile_duration_seconds", "Compilation duration, estimated and actual")
                .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["kind", "mode"],
        )?;
        let active_version = IntGaugeVec::new(
            Opts::new("cgov_active_bundle_version", "Active bundle version per namespace"),
            &["namespace"],
        )?;
        let escalations_open = IntGauge::new("cgov_escalations_open", "Open escalations")?;

        registry.register(Box::new(enforcement_latency.clone()))?;
        registry.register(Box::new(decisions.clone()))?;
        registry.register(Box::new(cache_hit_ratio.clone()))?;
        registry.register(Box::new(cache_inconsistencies.clone()))?;
        registry.register(Box::new(conflicts.clone()))?;
        registry.register(Box::new(compile_duration.clone()))?;
        registry.register(Box::new(active_version.clone()))?;
        registry.register(Box::new(escalations_open.clone()))?;

        Ok(Self {
            inner: Arc::new(Inner {
                registry,
                enforcement_latency,
                decisions,
                cache_hit_ratio,
                cache_inconsistencies,
                conflicts,
                compile_duration,
                active_version,
                escalations_open,
            }),
        })
    }

    /// Record one enforcement decision.
    pub fn record_decision(&self, decision: &EnforcementDecision) {
        let i = &self.inner;
        i.enforcement_latency
            .with_label_values(&[decision.strategy.as_str()])
            .observe(decision.latency_micros as f64 / 1_000_000.0);
        let cache = if decision.cache_hit { "hit" } else { "miss" };
        i.decisions.with_label_values(&[decision.outcome(), cache]).inc();
    }

    /// Count detected conflicts.
    pub fn record_conflicts(&self, conflicts: &[Conflict]) {
        for c in conflicts {
            self.inner.conflicts.with_label_values(&[c.severity.as_str()]).inc();
        }
    }

    /// Record estimated and actual compile time of a fresh bundle.
    pub fn record_compile(&self, bundle: &CompiledBundle) {
        let mode = bundle.mode.as_str();
        let h = &self.inner.compile_duration;
        h.with_label_values(&["estimated", mode])
            .observe(Duration::from_micros(bundle.estimated_micros).as_secs_f64());
        h.with_label_values(&["actual", mode])
            .observe(Duration::from_micros(bundle.actual_micros).as_secs_f64());
    }

    /// Publish the active version of a namespace.
    pub fn set_active_version(&self, namespace: &Namespace, version: BundleVersion) {
        self.inner
            .active_version
            .with_label_values(&[namespace.as_str()])
            .set(i64::try_from(version.get()).unwrap_or(i64::MAX));
    }

    /// Refresh pulled gauges.
    pub fn refresh(&self, cache: &CacheStats, escalations_open: usize) {
        let i = &self.inner;
        i.cache_hit_ratio.with_label_values(&["hot"]).set(cache.hot.hit_rate);
        i.cache_hit_ratio.with_label_values(&["shared"]).set(cache.shared.hit_rate);
        i.cache_inconsistencies
            .set(i64::try_from(cache.inconsistencies).unwrap_or(i64::MAX));
        i.escalations_open
            .set(i64::try_from(escalations_open).unwrap_or(i64::MAX));
    }

    /// Text exposition of every metric.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.inner.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
