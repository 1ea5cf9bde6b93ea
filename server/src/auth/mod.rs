//! Authentication Service
//!
//! Dashboard identity via Discord OAuth, cookie sessions, and the session
//! trust (second factor) layer on top of them.

pub mod backup_codes;
mod error;
mod handlers;
mod middleware;
pub mod oauth;
pub mod secret_box;
pub mod session;
pub mod totp;
pub mod trust;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::api::AppState;

pub use error::{AuthError, AuthResult, ErrorResponse};
pub use middleware::{require_second_factor, require_session};
pub use oauth::DiscordOAuth;
pub use secret_box::{CryptoError, SecretBox};
pub use session::SessionUser;
pub use trust::{SessionTrustService, TrustError, TrustState};

/// Random 256-bit token, hex encoded.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// SHA-256 hex digest used to store tokens and backup codes.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Create authentication router.
///
/// Public routes:
/// - GET /login - Start Discord OAuth
/// - GET /callback - OAuth callback, opens a session
/// - POST /logout - End the session
///
/// Session routes (second factor may still be pending):
/// - GET /2fa/status
/// - POST /2fa/setup, /2fa/enable, /2fa/verify
///
/// Verified routes (second factor passed this session):
/// - POST /2fa/disable, /2fa/regenerate-backup-codes
pub fn router(state: AppState) -> Router<AppState> {
    let public_routes = Router::new()
        .route("/login", get(handlers::login))
        .route("/callback", get(handlers::callback))
        .route("/logout", post(handlers::logout));

    let session_routes = Router::new()
        .route("/2fa/status", get(handlers::status))
        .route("/2fa/setup", post(handlers::setup))
        .route("/2fa/enable", post(handlers::enable))
        .route("/2fa/verify", post(handlers::verify));

    let verified_routes = Router::new()
        .route("/2fa/disable", post(handlers::disable))
        .route(
            "/2fa/regenerate-backup-codes",
            post(handlers::regenerate_backup_codes),
        )
        .layer(from_fn(require_second_factor));

    public_routes.merge(
        session_routes
            .merge(verified_routes)
            .layer(from_fn_with_state(state, require_session)),
    )
}
