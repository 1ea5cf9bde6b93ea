//! Authentication HTTP Handlers

use axum::extract::{Query, State};
use axum::response::Redirect;
use axum::Json;
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use super::error::{AuthError, AuthResult};
use super::hash_token;
use super::oauth::{FlowState, OAuthError};
use super::session::{
    expired, oauth_cookie, remember_cookie, session_cookie, start_session, SessionUser,
    OAUTH_COOKIE, REMEMBER_COOKIE, SESSION_COOKIE,
};
use super::trust::{Enrollment, TrustError, TrustState, TrustStatus, VerificationMethod};
use crate::api::AppState;

/// Landing page once the session is trusted.
const DASHBOARD_PATH: &str = "/dashboard";
/// Page prompting for the second factor.
const VERIFY_PATH: &str = "/2fa/verify";

// ============================================================================
// Request/Response Types
// ============================================================================

/// OAuth callback query parameters.
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: String,
    pub state: String,
}

/// Enrollment confirmation.
#[derive(Debug, Deserialize, Validate)]
pub struct EnableRequest {
    /// Base32 secret returned by setup.
    #[validate(length(min = 16, max = 128))]
    pub secret: String,
    /// 6-digit TOTP code.
    #[validate(length(min = 6, max = 6))]
    pub token: String,
}

/// Second-factor proof.
#[derive(Debug, Deserialize, Validate)]
pub struct VerifyRequest {
    /// TOTP code or backup code.
    #[validate(length(min = 6, max = 16))]
    pub token: String,
    #[serde(default, rename = "rememberDevice", alias = "remember_device")]
    pub remember_device: bool,
}

/// Disable request; the application owner may omit the code.
#[derive(Debug, Deserialize, Validate)]
pub struct DisableRequest {
    #[validate(length(min = 6, max = 6))]
    pub token: Option<String>,
}

/// TOTP-gated request.
#[derive(Debug, Deserialize, Validate)]
pub struct TokenRequest {
    #[validate(length(min = 6, max = 6))]
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub status: TrustStatus,
    pub state: TrustState,
}

#[derive(Debug, Serialize)]
pub struct SetupResponse {
    #[serde(flatten)]
    pub enrollment: Enrollment,
    pub state: TrustState,
}

#[derive(Debug, Serialize)]
pub struct BackupCodesResponse {
    pub success: bool,
    pub backup_codes: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub success: bool,
    /// `None` when no second factor is enabled.
    #[serde(flatten)]
    pub method: Option<VerificationMethod>,
    pub remembered: bool,
    pub state: TrustState,
}

fn validate(request: &impl Validate) -> AuthResult<()> {
    request
        .validate()
        .map_err(|e| AuthError::Validation(e.to_string()))
}

// ============================================================================
// Login / Logout
// ============================================================================

/// Start the OAuth flow.
///
/// GET /auth/login
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
) -> AuthResult<(CookieJar, Redirect)> {
    let (url, flow) = state.oauth.authorize()?;
    let sealed = flow.seal(&state.secret_box)?;

    let jar = jar.add(oauth_cookie(sealed, state.config.cookie_secure));
    Ok((jar, Redirect::to(&url)))
}

/// Finish the OAuth flow and open a session.
///
/// The session starts verified unless the user has a second factor and no
/// valid remembered-device cookie.
///
/// GET /auth/callback
#[tracing::instrument(skip(state, jar, query))]
pub async fn callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<CallbackQuery>,
) -> AuthResult<(CookieJar, Redirect)> {
    let sealed = jar
        .get(OAUTH_COOKIE)
        .map(|c| c.value().to_string())
        .ok_or(OAuthError::InvalidState)?;
    let flow = FlowState::open(&sealed, &state.secret_box)?;
    if flow.csrf != query.state {
        return Err(OAuthError::InvalidState.into());
    }

    let identity = state.oauth.complete(&query.code, &flow).await?;
    let remember = jar.get(REMEMBER_COOKIE).map(|c| c.value().to_string());
    let trust = state
        .trust
        .establish_session(identity.id, remember.as_deref())
        .await?;

    let token = start_session(
        state.store.as_ref(),
        identity.id,
        &identity.username,
        trust.is_verified(),
        state.config.session_ttl_secs,
    )
    .await?;

    info!(user_id = %identity.id, state = ?trust, "Dashboard login");

    let jar = jar
        .remove(expired(OAUTH_COOKIE))
        .add(session_cookie(
            token,
            state.config.session_ttl_secs,
            state.config.cookie_secure,
        ));
    let target = if trust.is_verified() {
        DASHBOARD_PATH
    } else {
        VERIFY_PATH
    };
    Ok((jar, Redirect::to(target)))
}

/// End the session. The remembered device is kept.
///
/// POST /auth/logout
pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> AuthResult<(CookieJar, Redirect)> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        state.store.delete_session(&hash_token(cookie.value())).await?;
    }
    Ok((jar.remove(expired(SESSION_COOKIE)), Redirect::to("/")))
}

// ============================================================================
// Second Factor
// ============================================================================

/// GET /auth/2fa/status
pub async fn status(
    State(state): State<AppState>,
    user: SessionUser,
) -> AuthResult<Json<StatusResponse>> {
    let status = state.trust.status(user.user_id).await?;
    let trust = TrustState::resolve(status.enabled, user.second_factor_verified);
    Ok(Json(StatusResponse {
        status,
        state: trust,
    }))
}

/// Issue a secret to scan. Nothing is stored until `/enable`.
///
/// POST /auth/2fa/setup
pub async fn setup(
    State(state): State<AppState>,
    user: SessionUser,
) -> AuthResult<Json<SetupResponse>> {
    let enrollment = state
        .trust
        .begin_enrollment(user.user_id, &user.username)
        .await?;
    Ok(Json(SetupResponse {
        enrollment,
        state: TrustState::Enrolling,
    }))
}

/// Confirm the secret, enable the factor and return the backup codes once.
///
/// POST /auth/2fa/enable
pub async fn enable(
    State(state): State<AppState>,
    user: SessionUser,
    Json(request): Json<EnableRequest>,
) -> AuthResult<Json<BackupCodesResponse>> {
    validate(&request)?;

    let backup_codes = state
        .trust
        .confirm_enrollment(user.user_id, &request.secret, &request.token)
        .await?;
    // The code just proved possession of the factor.
    state.store.set_session_verified(user.session_id, true).await?;

    Ok(Json(BackupCodesResponse {
        success: true,
        backup_codes,
    }))
}

/// Prove the second factor for this session.
///
/// POST /auth/2fa/verify
pub async fn verify(
    State(state): State<AppState>,
    user: SessionUser,
    jar: CookieJar,
    Json(request): Json<VerifyRequest>,
) -> AuthResult<(CookieJar, Json<VerifyResponse>)> {
    validate(&request)?;

    let verification = match state
        .trust
        .verify(user.user_id, &request.token, request.remember_device)
        .await
    {
        Ok(verification) => verification,
        // Factor turned off since login: nothing left to prove.
        Err(TrustError::NotEnabled) => {
            state.store.set_session_verified(user.session_id, true).await?;
            return Ok((
                jar,
                Json(VerifyResponse {
                    success: true,
                    method: None,
                    remembered: false,
                    state: TrustState::NoSecondFactor,
                }),
            ));
        }
        Err(e) => return Err(e.into()),
    };
    state.store.set_session_verified(user.session_id, true).await?;

    let remembered = verification.remember_token.is_some();
    let jar = match verification.remember_token {
        Some(token) => jar.add(remember_cookie(token, state.config.cookie_secure)),
        None => jar,
    };

    Ok((
        jar,
        Json(VerifyResponse {
            success: true,
            method: Some(verification.method),
            remembered,
            state: TrustState::EnabledVerified,
        }),
    ))
}

/// POST /auth/2fa/disable
pub async fn disable(
    State(state): State<AppState>,
    user: SessionUser,
    jar: CookieJar,
    Json(request): Json<DisableRequest>,
) -> AuthResult<(CookieJar, Json<serde_json::Value>)> {
    validate(&request)?;

    state
        .trust
        .disable(user.user_id, request.token.as_deref())
        .await?;
    state.store.set_session_verified(user.session_id, true).await?;

    Ok((
        jar.remove(expired(REMEMBER_COOKIE)),
        Json(serde_json::json!({
            "success": true,
            "message": "Two-factor authentication disabled"
        })),
    ))
}

/// POST /auth/2fa/regenerate-backup-codes
pub async fn regenerate_backup_codes(
    State(state): State<AppState>,
    user: SessionUser,
    Json(request): Json<TokenRequest>,
) -> AuthResult<Json<BackupCodesResponse>> {
    validate(&request)?;

    let backup_codes = state
        .trust
        .regenerate_backup_codes(user.user_id, &request.token)
        .await?;
    Ok(Json(BackupCodesResponse {
        success: true,
        backup_codes,
    }))
}
