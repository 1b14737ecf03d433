//! REST endpoints.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::AppState;
use super::errors::{ApiResponse, Audience, catalog_error, progression_error};
use crate::catalog::{ContentPath, Milestone, Phase};
use crate::progress::Creator;

const DEFAULT_ACTIVITY_LIMIT: usize = 50;
const MAX_ACTIVITY_LIMIT: usize = 500;

fn ok<T: Serialize>(status: StatusCode, value: &T) -> ApiResponse {
    match serde_json::to_value(value) {
        Ok(json) => (status, Json(json)),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": format!("serialization failed: {e}") })),
        ),
    }
}

// ── Request bodies ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ReadQuery {
    #[serde(default)]
    pub audience: Audience,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct CreatorRequest {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub content_path: Option<ContentPath>,
    /// Initialize progress rows right after registering.
    #[serde(default)]
    pub initialize: bool,
}

#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub actor: String,
    #[serde(default)]
    pub audience: Audience,
    #[serde(default)]
    pub submission: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct OptionalRequest {
    pub milestone_ids: Vec<String>,
    pub is_optional: bool,
    #[serde(default)]
    pub reason: Option<String>,
    pub actor: String,
}

// ── Health ──────────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "creator-pipeline"
    }))
}

// ── Creators ────────────────────────────────────────────────────────────

pub async fn upsert_creator(
    State(state): State<AppState>,
    Json(body): Json<CreatorRequest>,
) -> ApiResponse {
    if body.id.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "Creator id must not be empty"})),
        );
    }

    let creator = Creator::new(body.id, body.content_path).with_display_name(body.display_name);
    if let Err(e) = state.engine.register_creator(&creator).await {
        return progression_error(e, Audience::Admin);
    }

    let initialized = if body.initialize {
        match state.engine.initialize_creator(&creator.id).await {
            Ok(created) => created,
            Err(e) => return progression_error(e, Audience::Admin),
        }
    } else {
        false
    };

    info!(creator_id = %creator.id, initialized, "Creator registered via API");
    ok(
        StatusCode::OK,
        &serde_json::json!({ "creator": creator, "initialized": initialized }),
    )
}

pub async fn initialize_creator(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResponse {
    match state.engine.initialize_creator(&id).await {
        Ok(initialized) => ok(
            StatusCode::OK,
            &serde_json::json!({ "creator_id": id, "initialized": initialized }),
        ),
        Err(e) => progression_error(e, Audience::Admin),
    }
}

pub async fn list_milestones(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ReadQuery>,
) -> ApiResponse {
    match state.engine.list_applicable_milestones(&id).await {
        Ok(milestones) => ok(StatusCode::OK, &milestones),
        Err(e) => progression_error(e, query.audience),
    }
}

pub async fn get_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ReadQuery>,
) -> ApiResponse {
    match state.engine.compute_progress(&id).await {
        Ok(progress) => ok(StatusCode::OK, &progress),
        Err(e) => progression_error(e, query.audience),
    }
}

pub async fn list_activity(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ReadQuery>,
) -> ApiResponse {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_ACTIVITY_LIMIT)
        .clamp(1, MAX_ACTIVITY_LIMIT);
    match state.engine.list_activity(&id, limit).await {
        Ok(entries) => ok(StatusCode::OK, &entries),
        Err(e) => progression_error(e, query.audience),
    }
}

// ── Transitions ─────────────────────────────────────────────────────────

pub async fn start_milestone(
    State(state): State<AppState>,
    Path((id, milestone_id)): Path<(String, String)>,
    Json(body): Json<ActionRequest>,
) -> ApiResponse {
    match state
        .engine
        .start_milestone(&id, &milestone_id, &body.actor)
        .await
    {
        Ok(()) => ok(
            StatusCode::OK,
            &serde_json::json!({ "milestone_id": milestone_id, "status": "in_progress" }),
        ),
        Err(e) => progression_error(e, body.audience),
    }
}

pub async fn submit_milestone(
    State(state): State<AppState>,
    Path((id, milestone_id)): Path<(String, String)>,
    Json(body): Json<ActionRequest>,
) -> ApiResponse {
    match state
        .engine
        .submit_for_approval(&id, &milestone_id, &body.actor, body.submission)
        .await
    {
        Ok(()) => ok(
            StatusCode::OK,
            &serde_json::json!({ "milestone_id": milestone_id, "status": "waiting_approval" }),
        ),
        Err(e) => progression_error(e, body.audience),
    }
}

pub async fn complete_milestone(
    State(state): State<AppState>,
    Path((id, milestone_id)): Path<(String, String)>,
    Json(body): Json<ActionRequest>,
) -> ApiResponse {
    match state
        .engine
        .complete_milestone(&id, &milestone_id, &body.actor, body.submission)
        .await
    {
        Ok(outcome) => ok(StatusCode::OK, &outcome),
        Err(e) => progression_error(e, body.audience),
    }
}

pub async fn reopen_milestone(
    State(state): State<AppState>,
    Path((id, milestone_id)): Path<(String, String)>,
    Json(body): Json<ActionRequest>,
) -> ApiResponse {
    match state
        .engine
        .reopen_milestone(&id, &milestone_id, &body.actor)
        .await
    {
        Ok(()) => ok(
            StatusCode::OK,
            &serde_json::json!({ "milestone_id": milestone_id, "status": "available" }),
        ),
        Err(e) => progression_error(e, body.audience),
    }
}

pub async fn set_optional(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<OptionalRequest>,
) -> ApiResponse {
    match state
        .engine
        .set_optional(
            &id,
            &body.milestone_ids,
            body.is_optional,
            body.reason,
            &body.actor,
        )
        .await
    {
        Ok(updated) => ok(StatusCode::OK, &serde_json::json!({ "updated": updated })),
        Err(e) => progression_error(e, Audience::Admin),
    }
}

// ── Repair ──────────────────────────────────────────────────────────────

pub async fn repair_creator(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResponse {
    match state.engine.repair_progression(&id).await {
        Ok(outcome) => ok(StatusCode::OK, &outcome),
        Err(e) => progression_error(e, Audience::Admin),
    }
}

pub async fn repair_all(State(state): State<AppState>) -> ApiResponse {
    match state.engine.repair_all().await {
        Ok(report) => ok(StatusCode::OK, &report),
        Err(e) => progression_error(e, Audience::Admin),
    }
}

// ── Catalog ─────────────────────────────────────────────────────────────

pub async fn get_catalog(State(state): State<AppState>) -> ApiResponse {
    match state.engine.catalog().await {
        Ok(view) => ok(StatusCode::OK, &view),
        Err(e) => catalog_error(e),
    }
}

pub async fn upsert_phase(State(state): State<AppState>, Json(phase): Json<Phase>) -> ApiResponse {
    let response = serde_json::json!({ "phase_id": phase.id });
    match state.engine.upsert_phase(phase).await {
        Ok(()) => ok(StatusCode::OK, &response),
        Err(e) => catalog_error(e),
    }
}

pub async fn upsert_milestone(
    State(state): State<AppState>,
    Json(milestone): Json<Milestone>,
) -> ApiResponse {
    let response = serde_json::json!({ "milestone_id": milestone.id });
    match state.engine.upsert_milestone(milestone).await {
        Ok(()) => ok(StatusCode::OK, &response),
        Err(e) => catalog_error(e),
    }
}

pub async fn retire_milestone(
    State(state): State<AppState>,
    Path(milestone_id): Path<String>,
) -> ApiResponse {
    match state.engine.retire_milestone(&milestone_id).await {
        Ok(true) => ok(
            StatusCode::OK,
            &serde_json::json!({ "milestone_id": milestone_id, "retired": true }),
        ),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Milestone not found"})),
        ),
        Err(e) => catalog_error(e),
    }
}
