//! API Router and Application State
//!
//! Central routing configuration and shared state.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{extract::State, middleware::from_fn, middleware::from_fn_with_state, routing::get, Json, Router};
use serde::Serialize;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    access::{ApplicationOwner, PermissionResolver},
    admin, auth,
    auth::{DiscordOAuth, SecretBox, SessionTrustService},
    commands::CommandGate,
    config::Config,
    db::AccessStore,
    guild,
    platform::MembershipProvider,
    sync::RoleSyncEngine,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Access store (`PostgreSQL` in production)
    pub store: Arc<dyn AccessStore>,
    /// Server configuration
    pub config: Arc<Config>,
    /// Role synchronization engine
    pub sync: Arc<RoleSyncEngine>,
    pub resolver: PermissionResolver,
    /// Second-factor state machine
    pub trust: SessionTrustService,
    /// Gate for bot commands
    pub commands: CommandGate,
    /// Discord OAuth client for dashboard login
    pub oauth: DiscordOAuth,
    /// Seals OAuth flow state and second-factor secrets
    pub secret_box: SecretBox,
}

impl AppState {
    /// Wire the access control services over a store and a platform client.
    pub fn new(
        store: Arc<dyn AccessStore>,
        platform: Arc<dyn MembershipProvider>,
        config: Config,
    ) -> Result<Self> {
        let secret_box = SecretBox::from_hex(&config.mfa_encryption_key)
            .context("Invalid MFA encryption key")?;
        let owner = ApplicationOwner::new(config.owner_id);

        let sync = Arc::new(RoleSyncEngine::new(store.clone(), platform.clone()));
        let resolver = PermissionResolver::new(store.clone(), platform, sync.clone(), owner)
            .with_dashboard_roles(&config.dashboard_elevated_role, &config.dashboard_liaison_role);
        let trust = SessionTrustService::new(
            store.clone(),
            secret_box.clone(),
            owner,
            config.bot_name.clone(),
        );
        let commands = CommandGate::new(resolver.clone(), sync.clone());
        let oauth = DiscordOAuth::new(
            &config.discord_client_id,
            &config.discord_client_secret,
            &config.discord_callback_url,
            &config.discord_api_base,
            config.platform_timeout(),
        )
        .context("Failed to create Discord OAuth client")?;

        Ok(Self {
            store,
            config: Arc::new(config),
            sync,
            resolver,
            trust,
            commands,
            oauth,
            secret_box,
        })
    }
}

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Session first, then the second factor; admin applies the owner check itself
    let protected_routes = Router::new()
        .nest("/api/guilds", guild::router())
        .nest("/api/admin", admin::router(state.clone()))
        .layer(from_fn(auth::require_second_factor))
        .layer(from_fn_with_state(state.clone(), auth::require_session));

    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Login, logout and second-factor routes
        .nest("/auth", auth::router(state.clone()))
        .merge(protected_routes)
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    /// Service status
    status: &'static str,
    /// Whether an application owner is configured
    owner_configured: bool,
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        owner_configured: state.resolver.owner().id().is_some(),
    })
}
