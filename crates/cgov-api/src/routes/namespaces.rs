//! # Namespace Routes
//!
//! - `POST /v1/namespaces/:ns/compile`            — stage rule changes and run the pipeline
//! - `POST /v1/namespaces/:ns/enforce`            — evaluate one request
//! - `POST /v1/namespaces/:ns/activate`           — re-check the gate for a blocked bundle
//! - `POST /v1/namespaces/:ns/rollback`           — re-activate a previous version
//! - `GET  /v1/namespaces/:ns/manifest`           — manifest of the active bundle
//! - `GET  /v1/namespaces/:ns/versions`           — stored versions and statuses
//! - `GET  /v1/namespaces/:ns/bundles/:version`   — a stored bundle
//! - `GET  /v1/namespaces/:ns/conflicts`          — conflicts from the last run

use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use cgov_compiler::CompiledBundle;
use cgov_conflict::{Conflict, EscalationId};
use cgov_core::{BundleStatus, BundleVersion, ContentDigest, Namespace, RuleId};
use cgov_enforcement::{EnforcementContext, EnforcementDecision, EnforcementRequest};
use cgov_engine::{Activation, CompileBatch, CompileReport};
use cgov_manifest::CompilationManifest;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;
use crate::extractors::extract_json;
use crate::state::AppState;

/// Assemble the namespace router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/namespaces/:ns/compile", post(compile))
        .route("/v1/namespaces/:ns/enforce", post(enforce))
        .route("/v1/namespaces/:ns/activate", post(activate))
        .route("/v1/namespaces/:ns/rollback", post(rollback))
        .route("/v1/namespaces/:ns/manifest", get(manifest))
        .route("/v1/namespaces/:ns/versions", get(versions))
        .route("/v1/namespaces/:ns/bundles/:version", get(bundle))
        .route("/v1/namespaces/:ns/conflicts", get(conflicts))
}

// ---------------------------------------------------------------------------
// Request and response types
// ---------------------------------------------------------------------------

/// Result of a pipeline run.
#[derive(Debug, Serialize, Deserialize)]
pub struct CompileResponse {
    /// Version the manifest is bound to.
    pub manifest_version: u64,
    /// Aggregate digest of the manifest.
    pub manifest_digest: ContentDigest,
    /// Bundle version produced or reused.
    pub bundle_version: u64,
    /// `active`, `blocked_by_conflict`, ...
    pub status: BundleStatus,
    /// `full` or `partial`.
    pub mode: String,
    /// Nothing changed; the previous bundle was kept.
    pub reused: bool,
    /// Rules whose fragments were rendered.
    pub affected: Vec<RuleId>,
    /// Conflicts found, most severe first.
    pub conflicts: Vec<Conflict>,
    /// Escalations filed or still open for this rule set.
    pub escalations: Vec<EscalationId>,
    /// Why the bundle is not active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<CompileReport> for CompileResponse {
    fn from(report: CompileReport) -> Self {
        Self {
            manifest_version: report.bundle_version.get(),
            manifest_digest: report.manifest_digest,
            bundle_version: report.bundle_version.get(),
            status: report.status,
            mode: report.mode.as_str().to_string(),
            reused: report.reused,
            affected: report.affected,
            conflicts: report.conflicts,
            escalations: report.resolution.escalations.iter().map(|e| e.id).collect(),
            error: report.error,
        }
    }
}

/// Body of an enforcement request.
#[derive(Debug, Deserialize)]
pub struct EnforceBody {
    /// Input document handed to the runtime.
    pub input: Value,
    /// Request category, for priority-weighted strategies.
    #[serde(default)]
    pub category: Option<String>,
    /// Deny rather than allow when the runtime is unavailable.
    #[serde(default)]
    pub safety_critical: bool,
    /// Overall deadline in milliseconds.
    #[serde(default)]
    pub deadline_ms: Option<u64>,
    /// Caller identity, for logs.
    #[serde(default)]
    pub requester: Option<String>,
}

/// Body of a rollback request.
#[derive(Debug, Deserialize)]
pub struct RollbackBody {
    /// Version to make active again.
    pub version: u64,
}

/// One stored version.
#[derive(Debug, Serialize, Deserialize)]
pub struct VersionSummary {
    /// Bundle version.
    pub version: u64,
    /// Lifecycle status.
    pub status: BundleStatus,
}

fn namespace(raw: &str) -> Result<Namespace, AppError> {
    Ok(Namespace::new(raw)?)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn compile(
    State(state): State<AppState>,
    Path(ns): Path<String>,
    body: Result<Json<CompileBatch>, JsonRejection>,
) -> Result<Json<CompileResponse>, AppError> {
    let ns = namespace(&ns)?;
    let batch = extract_json(body)?;
    let report = state.engine.compile(&ns, batch).await?;
    Ok(Json(report.into()))
}

async fn enforce(
    State(state): State<AppState>,
    Path(ns): Path<String>,
    body: Result<Json<EnforceBody>, JsonRejection>,
) -> Result<Json<EnforcementDecision>, AppError> {
    let ns = namespace(&ns)?;
    let body = extract_json(body)?;
    let mut request = EnforcementRequest::new(ns, body.input);
    if let Some(category) = body.category {
        request = request.with_category(category);
    }
    let context = EnforcementContext {
        safety_critical: body.safety_critical,
        deadline: body.deadline_ms.map(Duration::from_millis),
        requester: body.requester,
    };
    Ok(Json(state.engine.enforce(&request, &context).await?))
}

async fn activate(
    State(state): State<AppState>,
    Path(ns): Path<String>,
) -> Result<Json<CompileResponse>, AppError> {
    let ns = namespace(&ns)?;
    let report = state.engine.activate(&ns).await?;
    Ok(Json(report.into()))
}

async fn rollback(
    State(state): State<AppState>,
    Path(ns): Path<String>,
    body: Result<Json<RollbackBody>, JsonRejection>,
) -> Result<Json<Activation>, AppError> {
    let ns = namespace(&ns)?;
    let body = extract_json(body)?;
    Ok(Json(state.engine.rollback(&ns, BundleVersion(body.version)).await?))
}

async fn manifest(
    State(state): State<AppState>,
    Path(ns): Path<String>,
) -> Result<Json<CompilationManifest>, AppError> {
    let ns = namespace(&ns)?;
    Ok(Json(state.engine.manifest(&ns)?))
}

async fn versions(
    State(state): State<AppState>,
    Path(ns): Path<String>,
) -> Result<Json<Vec<VersionSummary>>, AppError> {
    let ns = namespace(&ns)?;
    let versions = state
        .engine
        .versions(&ns)?
        .into_iter()
        .map(|(v, status)| VersionSummary {
            version: v.get(),
            status,
        })
        .collect();
    Ok(Json(versions))
}

async fn bundle(
    State(state): State<AppState>,
    Path((ns, version)): Path<(String, u64)>,
) -> Result<Json<CompiledBundle>, AppError> {
    let ns = namespace(&ns)?;
    let bundle = state.engine.bundle(&ns, BundleVersion(version)).await?;
    Ok(Json(bundle.as_ref().clone()))
}

async fn conflicts(
    State(state): State<AppState>,
    Path(ns): Path<String>,
) -> Result<Json<Vec<Conflict>>, AppError> {
    let ns = namespace(&ns)?;
    Ok(Json(state.engine.conflicts(&ns)))
}
