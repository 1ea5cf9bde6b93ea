//! Owner Admin Module
//!
//! Owner-only endpoints for managing the dashboard operator allow-list.

pub mod handlers;
pub mod middleware;
pub mod types;

use axum::{
    middleware::from_fn_with_state,
    routing::{delete, get},
    Router,
};

use crate::api::AppState;

pub use middleware::require_application_owner;
pub use types::{AdminError, OwnerUser};

/// Create the admin router.
///
/// Must be mounted behind the session and second-factor middleware.
pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/operators",
            get(handlers::list_operators).post(handlers::add_operator),
        )
        .route("/operators/{user_id}", delete(handlers::remove_operator))
        .layer(from_fn_with_state(state, require_application_owner))
}
