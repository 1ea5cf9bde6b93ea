//! Authentication Error Types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use super::oauth::OAuthError;
use super::secret_box::CryptoError;
use super::trust::TrustError;
use crate::access::DenyReason;
use crate::db::StoreError;

/// Web-facing authentication and authorization errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No valid session cookie.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Session exists but the second factor is still unproven.
    #[error("Two-factor verification required")]
    SecondFactorRequired,

    #[error("Invalid verification code")]
    InvalidProof,

    #[error("Two-factor authentication is already enabled")]
    AlreadyEnabled,

    #[error("Two-factor authentication is not enabled")]
    NotEnabled,

    /// Access decision denied the request.
    #[error("{0}")]
    Forbidden(DenyReason),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Login failed")]
    OAuth(#[from] OAuthError),

    #[error("Service temporarily unavailable")]
    Unavailable,

    #[error("Database error")]
    Store(StoreError),

    #[error("Internal server error")]
    Internal(String),
}

/// Error response body for JSON responses.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Machine-readable error code.
    pub error: String,
    /// Human-readable error message.
    pub message: String,
    /// Structured deny reason for access decisions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenyReason>,
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(_) => Self::Unavailable,
            other => Self::Store(other),
        }
    }
}

impl From<CryptoError> for AuthError {
    fn from(err: CryptoError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<TrustError> for AuthError {
    fn from(err: TrustError) -> Self {
        match err {
            TrustError::InvalidProof => Self::InvalidProof,
            TrustError::AlreadyEnabled => Self::AlreadyEnabled,
            TrustError::NotEnabled => Self::NotEnabled,
            TrustError::MalformedSecret => Self::Validation("Malformed secret".into()),
            TrustError::Store(e) => e.into(),
            TrustError::Crypto(e) => e.into(),
            TrustError::Internal(msg) => Self::Internal(msg),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Self::NotAuthenticated => (StatusCode::UNAUTHORIZED, "NOT_AUTHENTICATED"),
            Self::SecondFactorRequired => (StatusCode::FORBIDDEN, "SECOND_FACTOR_REQUIRED"),
            Self::InvalidProof => (StatusCode::BAD_REQUEST, "INVALID_CODE"),
            Self::AlreadyEnabled => (StatusCode::CONFLICT, "ALREADY_ENABLED"),
            Self::NotEnabled => (StatusCode::BAD_REQUEST, "NOT_ENABLED"),
            Self::Forbidden(
                DenyReason::UpstreamUnavailable | DenyReason::StoreUnavailable,
            ) => (StatusCode::SERVICE_UNAVAILABLE, "FORBIDDEN"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Self::OAuth(OAuthError::InvalidState) => (StatusCode::BAD_REQUEST, "OAUTH_STATE"),
            Self::OAuth(_) => (StatusCode::BAD_GATEWAY, "OAUTH_FAILED"),
            Self::Unavailable => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE"),
            Self::Store(_) | Self::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };

        match &self {
            Self::Store(e) => error!(error = %e, "Store failure in auth route"),
            Self::Internal(msg) => error!(error = %msg, "Internal auth error"),
            Self::OAuth(e) => error!(error = ?e, "OAuth login failed"),
            _ => {}
        }

        let reason = match &self {
            Self::Forbidden(reason) => Some(*reason),
            _ => None,
        };
        let body = Json(ErrorResponse {
            error: code.to_string(),
            message: self.to_string(),
            reason,
        });

        (status, body).into_response()
    }
}

/// Result type for auth operations.
pub type AuthResult<T> = Result<T, AuthError>;
