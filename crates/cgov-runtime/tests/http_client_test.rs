//! HTTP runtime client against a mock policy runtime.

use std::time::Duration;

use cgov_core::{BundleVersion, Namespace};
use cgov_runtime::{Backoff, HttpRuntimeClient, PolicyRuntime, RetryPolicy, RuntimeConfig, RuntimeError};
use serde_json::json;
use wiremock::matchers::{body_json, body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> HttpRuntimeClient {
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
    }
    .with_token("test-token");
    HttpRuntimeClient::new(&config).expect("client")
}

fn ns() -> Namespace {
    Namespace::new("ops").expect("namespace")
}

#[tokio::test]
async fn push_sends_text_and_version_header() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/policies/ops"))
        .and(header("X-Bundle-Version", "3"))
        .and(header("Authorization", "Bearer test-token"))
        .and(body_string("package cgov.ops\n"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .push_bundle(&ns(), BundleVersion(3), "package cgov.ops\n")
        .await
        .expect("push");
}

#[tokio::test]
async fn query_returns_decision_with_trace() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/data/cgov/ops/decision"))
        .and(body_json(json!({"input": {"requester": {"category": "contractor"}}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": {"allow": false, "allow_matches": ["allow-staff"], "deny_matches": ["deny-contractors"]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let decision = client(&server)
        .query(&ns(), &json!({"requester": {"category": "contractor"}}), None)
        .await
        .expect("query");
    assert!(!decision.allow);
    assert_eq!(decision.deny_matches, vec!["deny-contractors".to_string()]);
}

#[tokio::test]
async fn server_errors_are_retried_once_then_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/data/cgov/ops/decision"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(2)
        .mount(&server)
        .await;

    let err = client(&server)
        .query(&ns(), &json!({}), None)
        .await
        .expect_err("must fail");
    match err {
        RuntimeError::Unavailable { attempts, reason, .. } => {
            assert_eq!(attempts, 2);
            assert!(reason.contains("503"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn client_errors_fail_immediately() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/policies/ops"))
        .respond_with(ResponseTemplate::new(400).set_body_string("rego_parse_error"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server)
        .push_bundle(&ns(), BundleVersion(1), "not rego")
        .await
        .expect_err("must fail");
    assert!(matches!(err, RuntimeError::Status { status: 400, .. }));
}

#[tokio::test]
async fn multibyte_error_body_is_clipped() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/policies/ops"))
        .respond_with(ResponseTemplate::new(400).set_body_string(format!("{}é…", "a".repeat(511))))
        .mount(&server)
        .await;

    let err = client(&server)
        .push_bundle(&ns(), BundleVersion(1), "allow { true }")
        .await
        .expect_err("must fail");
    match err {
        RuntimeError::Status { status: 400, body, .. } => {
            assert!(body.len() <= 512);
            assert!(body.starts_with("aaa"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn missing_result_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/data/cgov/ops/decision"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server).query(&ns(), &json!({}), None).await.expect_err("must fail");
    assert!(matches!(err, RuntimeError::Decode { .. }));
}

#[tokio::test]
async fn slow_runtime_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/data/cgov/ops/decision"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"result": {"allow": true}}))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let err = client(&server)
        .query(&ns(), &json!({}), Some(Duration::from_millis(20)))
        .await
        .expect_err("must time out");
    assert!(err.to_string().contains("timed out"));
}

#[tokio::test]
async fn health_check() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    client(&server).health().await.expect("healthy");
}
