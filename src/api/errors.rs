//! Error-to-response mapping.
//!
//! Creators get a generic retry message; admins get the error taxonomy.

use axum::{Json, http::StatusCode};
use serde::Deserialize;
use tracing::error;

use crate::error::{CatalogError, ProgressionError};

pub type ApiResponse = (StatusCode, Json<serde_json::Value>);

const CREATOR_MESSAGE: &str = "Couldn't update your progress, please retry.";

/// Who the response is rendered for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    Creator,
    #[default]
    Admin,
}

pub fn status_for(err: &ProgressionError) -> StatusCode {
    match err {
        ProgressionError::UnknownCreator { .. } | ProgressionError::UnknownMilestone { .. } => {
            StatusCode::NOT_FOUND
        }
        ProgressionError::NotInitialized { .. }
        | ProgressionError::ConcurrentModification { .. } => StatusCode::CONFLICT,
        ProgressionError::InvalidTransition { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        ProgressionError::Catalog(e) => catalog_status(e),
        ProgressionError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn catalog_status(err: &CatalogError) -> StatusCode {
    match err {
        CatalogError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

pub fn progression_error(err: ProgressionError, audience: Audience) -> ApiResponse {
    let status = status_for(&err);
    if status.is_server_error() {
        error!(error = %err, "Progression request failed");
    }
    let body = match audience {
        Audience::Creator => serde_json::json!({
            "error": CREATOR_MESSAGE,
            "retryable": err.is_retryable() || status.is_server_error(),
        }),
        Audience::Admin => serde_json::json!({
            "error": err.to_string(),
            "code": err.code(),
            "retryable": err.is_retryable(),
        }),
    };
    (status, Json(body))
}

pub fn catalog_error(err: CatalogError) -> ApiResponse {
    let status = catalog_status(&err);
    if status.is_server_error() {
        error!(error = %err, "Catalog request failed");
    }
    (
        status,
        Json(serde_json::json!({ "error": err.to_string(), "code": "catalog" })),
    )
}
