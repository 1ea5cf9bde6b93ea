//! Admin module types.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use thiserror::Error;
use validator::Validate;
use vk_common::PrincipalId;

use crate::db::StoreError;

/// The application owner, confirmed by middleware.
#[derive(Debug, Clone)]
pub struct OwnerUser {
    pub user_id: PrincipalId,
    pub username: String,
}

/// Admin API error type.
#[derive(Debug, Error)]
pub enum AdminError {
    /// Caller is not the application owner.
    #[error("This area is only accessible to the bot owner")]
    NotOwner,

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// Already in the requested state.
    #[error("{0}")]
    Conflict(String),

    /// Validation error.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Store error.
    #[error("Database error")]
    Store(#[from] StoreError),
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::NotOwner => (StatusCode::FORBIDDEN, serde_json::json!({"error": "not_owner", "message": "This area is only accessible to the bot owner"})),
            Self::NotFound(what) => (StatusCode::NOT_FOUND, serde_json::json!({"error": "not_found", "message": format!("{} not found", what)})),
            Self::Conflict(msg) => (StatusCode::CONFLICT, serde_json::json!({"error": "conflict", "message": msg})),
            Self::Validation(msg) => (StatusCode::BAD_REQUEST, serde_json::json!({"error": "validation", "message": msg})),
            Self::Store(e) => {
                tracing::error!(error = %e, "Admin endpoint store error");
                (StatusCode::INTERNAL_SERVER_ERROR, serde_json::json!({"error": "database", "message": "Database error"}))
            }
        };
        (status, Json(body)).into_response()
    }
}

// Request types
#[derive(Debug, Deserialize, Validate)]
pub struct AddOperatorRequest {
    pub user_id: PrincipalId,
    #[validate(length(min = 1, max = 100))]
    pub username: String,
    #[serde(default)]
    #[validate(length(max = 500))]
    pub reason: String,
}
