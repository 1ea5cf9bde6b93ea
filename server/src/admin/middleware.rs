//! Admin authorization middleware.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use super::types::{AdminError, OwnerUser};
use crate::api::AppState;
use crate::auth::SessionUser;

/// Middleware that requires the application owner.
///
/// Expects [`SessionUser`] from the session middleware.
#[tracing::instrument(skip(state, request, next))]
pub async fn require_application_owner(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AdminError> {
    let session = request
        .extensions()
        .get::<SessionUser>()
        .cloned()
        .ok_or(AdminError::NotOwner)?;

    if !state.resolver.owner().is_application_owner(session.user_id) {
        return Err(AdminError::NotOwner);
    }

    request.extensions_mut().insert(OwnerUser {
        user_id: session.user_id,
        username: session.username,
    });
    Ok(next.run(request).await)
}
