//! Dashboard Guild Module
//!
//! Community listing, role mirror inspection, manual role sync and guild
//! settings for the web dashboard.

pub mod handlers;

use axum::routing::{get, post};
use axum::Router;

use crate::api::AppState;

pub use handlers::GuildError;

/// Create the guild router. Mounted under `/api/guilds`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_guilds))
        .route("/{id}/roles", get(handlers::list_roles))
        .route("/{id}/roles/sync", post(handlers::sync_roles))
        .route("/{id}/settings", post(handlers::update_settings))
}
