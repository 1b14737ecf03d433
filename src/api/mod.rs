//! HTTP surface: REST endpoints over the progression engine plus the
//! `/ws/progress` event stream.

pub mod errors;
pub mod routes;
pub mod ws;

use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post, put},
};
use tower_http::cors::CorsLayer;

use crate::engine::ProgressionEngine;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ProgressionEngine>,
}

/// Build the Axum router with REST and WebSocket routes.
pub fn progress_routes(engine: Arc<ProgressionEngine>) -> Router {
    let state = AppState { engine };

    Router::new()
        .route("/health", get(routes::health))
        .route("/ws/progress", get(ws::ws_handler))
        // Creators
        .route("/api/creators", post(routes::upsert_creator))
        .route("/api/creators/{id}/initialize", post(routes::initialize_creator))
        .route("/api/creators/{id}/milestones", get(routes::list_milestones))
        .route("/api/creators/{id}/progress", get(routes::get_progress))
        .route("/api/creators/{id}/activity", get(routes::list_activity))
        .route(
            "/api/creators/{id}/milestones/{milestone_id}/start",
            post(routes::start_milestone),
        )
        .route(
            "/api/creators/{id}/milestones/{milestone_id}/submit",
            post(routes::submit_milestone),
        )
        .route(
            "/api/creators/{id}/milestones/{milestone_id}/complete",
            post(routes::complete_milestone),
        )
        .route(
            "/api/creators/{id}/milestones/{milestone_id}/reopen",
            post(routes::reopen_milestone),
        )
        .route("/api/creators/{id}/optional", post(routes::set_optional))
        .route("/api/creators/{id}/repair", post(routes::repair_creator))
        .route("/api/repair", post(routes::repair_all))
        // Catalog
        .route("/api/catalog", get(routes::get_catalog))
        .route("/api/catalog/phases", put(routes::upsert_phase))
        .route("/api/catalog/milestones", put(routes::upsert_milestone))
        .route(
            "/api/catalog/milestones/{milestone_id}",
            delete(routes::retire_milestone),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}
