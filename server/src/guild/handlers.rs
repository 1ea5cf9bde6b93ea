//! Dashboard Guild Handlers
//!
//! Every handler runs behind session + second factor middleware and checks
//! guild access itself, fresh on each request.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use vk_common::{CommunityId, ExternalRoleId};

use crate::access::DenyReason;
use crate::api::AppState;
use crate::auth::SessionUser;
use crate::db::{Community, Role, StoreError};
use crate::platform::PlatformError;
use crate::sync::{RosterReport, SyncError};

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum GuildError {
    NotFound,
    Denied(DenyReason),
    Validation(String),
    Upstream,
    Store(StoreError),
}

impl IntoResponse for GuildError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            Self::NotFound => (
                StatusCode::NOT_FOUND,
                "GUILD_NOT_FOUND",
                "Guild not found".to_string(),
            ),
            Self::Denied(
                reason @ (DenyReason::UpstreamUnavailable | DenyReason::StoreUnavailable),
            ) => (
                StatusCode::SERVICE_UNAVAILABLE,
                reason.code(),
                reason.to_string(),
            ),
            Self::Denied(reason) => (StatusCode::FORBIDDEN, reason.code(), reason.to_string()),
            Self::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            Self::Upstream => (
                StatusCode::SERVICE_UNAVAILABLE,
                "UPSTREAM_UNAVAILABLE",
                "Discord could not be reached, try again shortly".to_string(),
            ),
            Self::Store(err) => {
                error!(%err, "Guild endpoint store error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "Database error".to_string(),
                )
            }
        };
        (
            status,
            Json(serde_json::json!({ "error": code, "message": message })),
        )
            .into_response()
    }
}

impl From<StoreError> for GuildError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

impl From<SyncError> for GuildError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Platform(PlatformError::NotFound) => Self::NotFound,
            SyncError::Platform(_) => Self::Upstream,
            SyncError::Store(e) => Self::Store(e),
            SyncError::AlreadyRegistered => Self::Validation(err.to_string()),
        }
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Community the current user may manage.
#[derive(Debug, Serialize)]
pub struct GuildSummary {
    pub id: CommunityId,
    pub name: String,
    pub moderator_role_id: Option<ExternalRoleId>,
}

impl From<Community> for GuildSummary {
    fn from(c: Community) -> Self {
        Self {
            id: c.id,
            name: c.name,
            moderator_role_id: c.moderator_role_id,
        }
    }
}

/// Guild settings update.
#[derive(Debug, Deserialize)]
pub struct UpdateSettingsRequest {
    /// Platform role granting privileged commands; `null` clears it.
    pub moderator_role_id: Option<ExternalRoleId>,
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub success: bool,
    #[serde(flatten)]
    pub report: RosterReport,
}

async fn ensure_access(
    state: &AppState,
    user: &SessionUser,
    guild: CommunityId,
) -> Result<(), GuildError> {
    state
        .resolver
        .has_dashboard_guild_access(user.user_id, guild)
        .await
        .into_result()
        .map_err(GuildError::Denied)
}

// ============================================================================
// Handlers
// ============================================================================

/// List the communities the user may manage.
///
/// GET /api/guilds
#[tracing::instrument(skip(state, user), fields(user_id = %user.user_id))]
pub async fn list_guilds(
    State(state): State<AppState>,
    user: SessionUser,
) -> Result<Json<Vec<GuildSummary>>, GuildError> {
    let communities = state.store.list_active_communities().await?;

    let mut visible = Vec::new();
    for community in communities {
        let decision = state
            .resolver
            .has_dashboard_guild_access(user.user_id, community.id)
            .await;
        match decision.reason {
            None => visible.push(GuildSummary::from(community)),
            Some(DenyReason::UpstreamUnavailable) => return Err(GuildError::Upstream),
            Some(DenyReason::StoreUnavailable) => {
                return Err(GuildError::Denied(DenyReason::StoreUnavailable))
            }
            Some(_) => {}
        }
    }

    Ok(Json(visible))
}

/// Local role mirror of one community, inactive roles included.
///
/// GET /api/guilds/{id}/roles
pub async fn list_roles(
    State(state): State<AppState>,
    user: SessionUser,
    Path(guild): Path<CommunityId>,
) -> Result<Json<Vec<Role>>, GuildError> {
    ensure_access(&state, &user, guild).await?;
    Ok(Json(state.store.list_roles(guild).await?))
}

/// Reconcile the role roster now.
///
/// POST /api/guilds/{id}/roles/sync
#[tracing::instrument(skip(state, user), fields(user_id = %user.user_id))]
pub async fn sync_roles(
    State(state): State<AppState>,
    user: SessionUser,
    Path(guild): Path<CommunityId>,
) -> Result<Json<SyncResponse>, GuildError> {
    ensure_access(&state, &user, guild).await?;

    let report = state.sync.reconcile_community_roster(guild).await.map_err(|e| {
        warn!(community_id = %guild, error = %e, "Manual role sync failed");
        GuildError::from(e)
    })?;

    info!(
        community_id = %guild,
        created = report.created,
        updated = report.updated,
        "Manual role sync"
    );
    Ok(Json(SyncResponse {
        success: true,
        report,
    }))
}

/// Set or clear the moderator role.
///
/// POST /api/guilds/{id}/settings
#[tracing::instrument(skip(state, user, body), fields(user_id = %user.user_id))]
pub async fn update_settings(
    State(state): State<AppState>,
    user: SessionUser,
    Path(guild): Path<CommunityId>,
    Json(body): Json<UpdateSettingsRequest>,
) -> Result<Json<GuildSummary>, GuildError> {
    ensure_access(&state, &user, guild).await?;

    if let Some(role) = body.moderator_role_id {
        let known = state
            .store
            .list_roles(guild)
            .await?
            .iter()
            .any(|r| r.active && r.external_id == Some(role));
        if !known {
            return Err(GuildError::Validation(
                "Role is not part of this guild's synced roster".into(),
            ));
        }
    }

    if !state
        .store
        .set_moderator_role(guild, body.moderator_role_id)
        .await?
    {
        return Err(GuildError::NotFound);
    }

    let community = state
        .store
        .find_community(guild)
        .await?
        .ok_or(GuildError::NotFound)?;
    info!(community_id = %guild, moderator_role = ?community.moderator_role_id, "Moderator role updated");
    Ok(Json(community.into()))
}
