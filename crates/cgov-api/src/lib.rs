//! # cgov-api — HTTP Surface
//!
//! | Prefix | Module | Purpose |
//! |---|---|---|
//! | `/v1/namespaces/:ns/*` | [`routes::namespaces`] | compile, enforce, activate, rollback, manifests, bundles |
//! | `/v1/escalations/*` | [`routes::escalations`] | conflict review |
//! | `/metrics` | this module | Prometheus scrape |
//! | `/health/*` | this module | liveness and readiness probes |
//!
//! ## Middleware Stack (execution order)
//!
//! ```text
//! TraceLayer → MetricsMiddleware → Handler
//! ```
//!
//! Authentication is expected in front of this service.

pub mod error;
pub mod extractors;
pub mod middleware;
pub mod routes;
pub mod state;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::middleware::from_fn;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Router};
use tower_http::trace::TraceLayer;

use crate::middleware::metrics::ApiMetrics;
use crate::state::AppState;

/// Largest accepted request body. Rule batches are the biggest payloads.
const BODY_LIMIT_BYTES: usize = 4 * 1024 * 1024;

/// Assemble the application router.
pub fn app(state: AppState, metrics: ApiMetrics) -> Router {
    let api = Router::new()
        .merge(routes::namespaces::router())
        .merge(routes::escalations::router())
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(from_fn(middleware::metrics::metrics_middleware))
        .layer(Extension(metrics.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let probes = Router::new()
        .route("/health/liveness", get(liveness))
        .route("/health/readiness", get(readiness))
        .route("/metrics", get(prometheus_metrics))
        .layer(Extension(metrics))
        .with_state(state);

    Router::new().merge(probes).merge(api)
}

/// GET /metrics: engine and HTTP metrics in Prometheus text format.
async fn prometheus_metrics(State(state): State<AppState>, Extension(metrics): Extension<ApiMetrics>) -> impl IntoResponse {
    let body = match (state.engine.render_metrics().await, metrics.encode()) {
        (Ok(engine), Ok(http)) => engine + &http,
        (Err(e), _) => {
            tracing::error!(error = %e, "failed to encode engine metrics");
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
        (_, Err(e)) => {
            tracing::error!(error = %e, "failed to encode HTTP metrics");
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}

/// Liveness probe: the process is running.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness probe: the policy runtime answers health checks.
async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    match state.engine.runtime_ready().await {
        Ok(()) => (StatusCode::OK, "ready".to_string()).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "readiness check failed");
            (StatusCode::SERVICE_UNAVAILABLE, format!("runtime unreachable: {e}")).into_response()
        }
    }
}
