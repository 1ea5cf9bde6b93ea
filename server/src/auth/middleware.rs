//! Authentication Middleware

use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;

use super::error::AuthError;
use super::session::{resolve_session, SessionUser, SESSION_COOKIE};
use crate::api::AppState;

/// Require a live dashboard session.
///
/// Resolves the session cookie and injects [`SessionUser`] into request
/// extensions. Routes behind this may still be second-factor unverified.
pub async fn require_session(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = jar
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .ok_or(AuthError::NotAuthenticated)?;

    let user = resolve_session(state.store.as_ref(), &token)
        .await?
        .ok_or(AuthError::NotAuthenticated)?;

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Require that the session has passed the second factor.
///
/// Must be layered inside [`require_session`].
pub async fn require_second_factor(request: Request, next: Next) -> Result<Response, AuthError> {
    let verified = request
        .extensions()
        .get::<SessionUser>()
        .ok_or(AuthError::NotAuthenticated)?
        .second_factor_verified;

    if !verified {
        return Err(AuthError::SecondFactorRequired);
    }
    Ok(next.run(request).await)
}

/// Extractor for the session user in handlers.
impl<S> FromRequestParts<S> for SessionUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Self>()
            .cloned()
            .ok_or(AuthError::NotAuthenticated)
    }
}
