//! # Escalation Review Routes
//!
//! - `GET  /v1/escalations`              — list, filtered by `namespace` and `state`
//! - `GET  /v1/escalations/:id`          — one escalation with its transition log
//! - `POST /v1/escalations/:id/resolve`  — record a reviewer decision and re-gate

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use cgov_conflict::{EscalationId, EscalationRecord, EscalationState, HumanResolution};
use cgov_core::Namespace;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::extractors::extract_json;
use crate::routes::namespaces::CompileResponse;
use crate::state::AppState;

/// Assemble the escalation router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/escalations", get(list_escalations))
        .route("/v1/escalations/:id", get(get_escalation))
        .route("/v1/escalations/:id/resolve", post(resolve_escalation))
}

/// List filters.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Only this namespace.
    pub namespace: Option<String>,
    /// Only this state.
    pub state: Option<EscalationState>,
}

/// A reviewer's decision.
#[derive(Debug, Deserialize)]
pub struct ResolveBody {
    /// Reviewer identity, recorded in the audit trail.
    pub actor: String,
    /// The decision.
    pub resolution: HumanResolution,
}

/// The closed escalation and the pipeline run it triggered.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResolveResponse {
    /// Escalation after the decision.
    pub escalation: EscalationRecord,
    /// The re-gated namespace.
    pub compile: CompileResponse,
}

fn escalation_id(raw: &str) -> Result<EscalationId, AppError> {
    raw.parse()
        .map_err(|e| AppError::Validation(format!("invalid escalation id {raw:?}: {e}")))
}

async fn list_escalations(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<EscalationRecord>>, AppError> {
    let namespace = query.namespace.map(Namespace::new).transpose()?;
    Ok(Json(state.engine.escalations(namespace.as_ref(), query.state)))
}

async fn get_escalation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<EscalationRecord>, AppError> {
    let id = escalation_id(&id)?;
    state
        .engine
        .escalation_queue()
        .get(id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("escalation {id}")))
}

async fn resolve_escalation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<ResolveBody>, JsonRejection>,
) -> Result<Json<ResolveResponse>, AppError> {
    let id = escalation_id(&id)?;
    let body = extract_json(body)?;
    if body.actor.trim().is_empty() {
        return Err(AppError::Validation("actor must not be empty".into()));
    }
    let outcome = state
        .engine
        .resolve_escalation(id, body.resolution, &body.actor)
        .await?;
    Ok(Json(ResolveResponse {
        escalation: outcome.escalation,
        compile: outcome.compile.into(),
    }))
}
