//! Operator allow-list handlers.
//!
//! Operators holding the liaison role get dashboard access to a guild.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use tracing::info;
use validator::Validate;
use vk_common::PrincipalId;

use crate::api::AppState;
use crate::db::{NewOperator, Operator};

use super::types::{AddOperatorRequest, AdminError, OwnerUser};

/// List allow-listed operators.
///
/// GET /api/admin/operators
pub async fn list_operators(
    State(state): State<AppState>,
) -> Result<Json<Vec<Operator>>, AdminError> {
    Ok(Json(state.store.list_operators().await?))
}

/// Allow-list an operator.
///
/// POST /api/admin/operators
#[tracing::instrument(skip(state, owner, body), fields(added_by = %owner.user_id))]
pub async fn add_operator(
    State(state): State<AppState>,
    Extension(owner): Extension<OwnerUser>,
    Json(body): Json<AddOperatorRequest>,
) -> Result<(StatusCode, Json<Operator>), AdminError> {
    body.validate()
        .map_err(|e| AdminError::Validation(e.to_string()))?;

    let created = state
        .store
        .add_operator(&NewOperator {
            user_id: body.user_id,
            username: body.username.trim().to_string(),
            added_by: owner.username,
            reason: body.reason,
        })
        .await?
        .ok_or_else(|| AdminError::Conflict("User is already an operator".into()))?;

    info!(operator_id = %created.user_id, "Operator added");
    Ok((StatusCode::CREATED, Json(created)))
}

/// Remove an operator.
///
/// DELETE /api/admin/operators/{user_id}
#[tracing::instrument(skip(state))]
pub async fn remove_operator(
    State(state): State<AppState>,
    Path(user_id): Path<PrincipalId>,
) -> Result<StatusCode, AdminError> {
    if !state.store.remove_operator(user_id).await? {
        return Err(AdminError::NotFound("Operator".into()));
    }

    info!(operator_id = %user_id, "Operator removed");
    Ok(StatusCode::NO_CONTENT)
}
