//! Dashboard sessions and their cookies.
//!
//! The session cookie holds a random token; only its SHA-256 digest is
//! stored. The second-factor flag lives on the session row, so logging out
//! drops it while the remembered-device token survives.

use std::sync::Arc;
use std::time::Instant;

use axum_extra::extract::cookie::{Cookie, SameSite};
use chrono::{Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;
use vk_common::PrincipalId;

use super::trust::REMEMBER_DEVICE_DAYS;
use super::{generate_token, hash_token};
use crate::db::{AccessStore, DashboardSession, NewSession, StoreResult};

pub const SESSION_COOKIE: &str = "vk_session";
pub const REMEMBER_COOKIE: &str = "remember_2fa";
pub const OAUTH_COOKIE: &str = "vk_oauth";

const OAUTH_FLOW_MINUTES: i64 = 10;
const PURGE_BATCH_SIZE: i64 = 1_000;

/// Authenticated dashboard user injected into request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub session_id: Uuid,
    pub user_id: PrincipalId,
    pub username: String,
    pub second_factor_verified: bool,
}

impl From<DashboardSession> for SessionUser {
    fn from(session: DashboardSession) -> Self {
        Self {
            session_id: session.id,
            user_id: session.user_id,
            username: session.username,
            second_factor_verified: session.second_factor_verified,
        }
    }
}

/// Create a session row and return the plaintext cookie token.
pub async fn start_session(
    store: &dyn AccessStore,
    user_id: PrincipalId,
    username: &str,
    second_factor_verified: bool,
    ttl_secs: i64,
) -> StoreResult<String> {
    let token = generate_token();
    store
        .create_session(&NewSession {
            token_hash: hash_token(&token),
            user_id,
            username: username.to_string(),
            second_factor_verified,
            expires_at: Utc::now() + Duration::seconds(ttl_secs),
        })
        .await?;
    Ok(token)
}

/// Look up the live session behind a cookie token.
pub async fn resolve_session(
    store: &dyn AccessStore,
    token: &str,
) -> StoreResult<Option<SessionUser>> {
    Ok(store
        .find_session(&hash_token(token))
        .await?
        .map(SessionUser::from))
}

fn base_cookie(name: &'static str, value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .build()
}

pub fn session_cookie(token: String, ttl_secs: i64, secure: bool) -> Cookie<'static> {
    let mut cookie = base_cookie(SESSION_COOKIE, token, secure);
    cookie.set_max_age(time::Duration::seconds(ttl_secs));
    cookie
}

pub fn remember_cookie(token: String, secure: bool) -> Cookie<'static> {
    let mut cookie = base_cookie(REMEMBER_COOKIE, token, secure);
    cookie.set_max_age(time::Duration::days(REMEMBER_DEVICE_DAYS));
    cookie
}

pub fn oauth_cookie(sealed: String, secure: bool) -> Cookie<'static> {
    let mut cookie = base_cookie(OAUTH_COOKIE, sealed, secure);
    cookie.set_max_age(time::Duration::minutes(OAUTH_FLOW_MINUTES));
    cookie
}

/// Removal cookie; path must match the one used when setting.
pub fn expired(name: &'static str) -> Cookie<'static> {
    Cookie::build((name, "")).path("/").build()
}

/// Start the periodic purge of expired session rows.
///
/// The immediate first tick is consumed so startup is not spent deleting.
pub fn spawn_session_purge_task(
    store: Arc<dyn AccessStore>,
    period: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            interval.tick().await;
            purge_expired_sessions(store.as_ref()).await;
        }
    })
}

/// Delete expired sessions in batches until none are left. Never fails.
#[tracing::instrument(skip(store))]
pub async fn purge_expired_sessions(store: &dyn AccessStore) -> u64 {
    let start = Instant::now();
    let mut total = 0;
    loop {
        match store.purge_expired_sessions(PURGE_BATCH_SIZE).await {
            Ok(deleted) => {
                total += deleted;
                if deleted < PURGE_BATCH_SIZE as u64 {
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to purge expired sessions");
                break;
            }
        }
    }

    info!(
        elapsed_ms = start.elapsed().as_millis() as u64,
        deleted = total,
        "Session purge completed"
    );
    total
}
