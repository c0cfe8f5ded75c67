//! Enforcement after activation and under runtime failure.
//!
//! Decisions served after an activation must never carry a superseded
//! bundle version, and a runtime that keeps failing must yield a deny in a
//! safety-critical context once the retry budget is spent.

use std::sync::Arc;

use cgov_compiler::CompiledBundle;
use cgov_core::{BundleVersion, Namespace, RuleId};
use cgov_engine::{CompileBatch, Engine, EngineConfig, RuleSubmission, SharedStore};
use cgov_enforcement::{EnforcementContext, EnforcementRequest};
use cgov_facts::FactEvaluator;
use cgov_manifest::MemoryStore;
use cgov_runtime::{Backoff, FailureMode, FakeRuntime, HttpRuntimeClient, PolicyRuntime, RetryPolicy, RuntimeConfig};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ALLOW_ADMINS: &str = "allow {\n    input.user.role == \"admin\"\n}";
const ALLOW_OPS: &str = "allow {\n    input.user.team == \"ops\"\n}";

fn ns() -> Namespace {
    Namespace::new("ops").unwrap()
}

fn upsert(rule: &str, src: &str) -> CompileBatch {
    CompileBatch {
        upserts: vec![RuleSubmission::new(RuleId::new(rule).unwrap(), src)],
        removals: Vec::new(),
    }
}

fn engine_on(runtime: Arc<dyn PolicyRuntime>) -> Engine {
    let store: SharedStore = Arc::new(MemoryStore::<CompiledBundle>::new());
    Engine::new(EngineConfig::default(), runtime, store, FactEvaluator::empty()).unwrap()
}

fn admin_request() -> EnforcementRequest {
    EnforcementRequest::new(ns(), json!({ "user": { "role": "admin", "team": "ops" } }))
}

fn safety_critical() -> EnforcementContext {
    EnforcementContext {
        safety_critical: true,
        ..EnforcementContext::default()
    }
}

#[tokio::test]
async fn no_decision_outlives_its_bundle() {
    let engine = engine_on(Arc::new(FakeRuntime::allow_all()));
    let ctx = EnforcementContext::default();
    engine.compile(&ns(), upsert("allow-admins", ALLOW_ADMINS)).await.unwrap();

    let miss = engine.enforce(&admin_request(), &ctx).await.unwrap();
    assert!(!miss.cache_hit);
    let hit = engine.enforce(&admin_request(), &ctx).await.unwrap();
    assert!(hit.cache_hit);
    assert_eq!(hit.bundle_version, BundleVersion::INITIAL);

    let v2 = engine.compile(&ns(), upsert("allow-ops", ALLOW_OPS)).await.unwrap();
    assert!(v2.is_active());
    for _ in 0..3 {
        let decision = engine.enforce(&admin_request(), &ctx).await.unwrap();
        assert_eq!(decision.bundle_version, BundleVersion(2));
    }

    let rollback = engine.rollback(&ns(), BundleVersion::INITIAL).await.unwrap();
    assert_eq!(rollback.previous, Some(BundleVersion(2)));
    let decision = engine.enforce(&admin_request(), &ctx).await.unwrap();
    assert!(!decision.cache_hit);
    assert_eq!(decision.bundle_version, BundleVersion::INITIAL);
}

#[tokio::test]
async fn three_failures_deny_safety_critical_requests() {
    let runtime = Arc::new(FakeRuntime::allow_all());
    let engine = engine_on(runtime.clone());
    engine.compile(&ns(), upsert("allow-admins", ALLOW_ADMINS)).await.unwrap();

    runtime.fail_next(3);
    let decision = engine.enforce(&admin_request(), &safety_critical()).await.unwrap();
    assert!(!decision.allow);
    assert_eq!(decision.failure_mode, Some(FailureMode::FailClosed));
    assert!(decision.failure_reason.is_some());
    assert_eq!(runtime.query_attempts(), 2);

    // The third injected failure is absorbed by the retry.
    let decision = engine.enforce(&admin_request(), &EnforcementContext::default()).await.unwrap();
    assert!(decision.allow);
    assert!(decision.failure_mode.is_none());
    assert!(!decision.cache_hit);
}

async fn mock_runtime() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/policies/ops"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/data/cgov/ops/decision"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .up_to_n_times(3)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/data/cgov/ops/decision"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": { "allow": true, "allow_matches": ["allow-admins"], "deny_matches": [] }
        })))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn http_runtime_outage_fails_closed_then_recovers() {
    let server = mock_runtime().await;
    let config = RuntimeConfig {
        base_url: server.uri(),
        request_timeout_ms: 500,
        retry: RetryPolicy {
            backoff: Backoff {
                initial_ms: 1,
                multiplier: 2.0,
                max_ms: 5,
            },
            ..RetryPolicy::default()
        },
        ..RuntimeConfig::default()
    };
    let engine = engine_on(Arc::new(HttpRuntimeClient::new(&config).unwrap()));
    let report = engine.compile(&ns(), upsert("allow-admins", ALLOW_ADMINS)).await.unwrap();
    assert!(report.is_active());

    let denied = engine.enforce(&admin_request(), &safety_critical()).await.unwrap();
    assert!(!denied.allow);
    assert_eq!(denied.failure_mode, Some(FailureMode::FailClosed));

    let allowed = engine.enforce(&admin_request(), &safety_critical()).await.unwrap();
    assert!(allowed.allow);
    assert!(allowed.failure_reason.is_none());
    assert_eq!(allowed.allow_matches, vec![RuleId::new("allow-admins").unwrap()]);

    let pushes = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.method.as_str() == "PUT")
        .count();
    assert_eq!(pushes, 1);
    let body: Value = serde_json::from_slice(
        &server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .rev()
            .find(|r| r.method.as_str() == "POST")
            .unwrap()
            .body,
    )
    .unwrap();
    assert_eq!(body["input"]["user"]["role"], "admin");
}
