//! `Valknut` Server - Main Entry Point
//!
//! Dashboard API plus the background role synchronization sweep.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use vk_server::{
    api, auth::session::spawn_session_purge_task, config, db, platform::DiscordClient,
    sync::spawn_role_sync_task,
};

/// Expired dashboard sessions are swept hourly.
const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vk_server=debug,tower_http=debug".into()),
        )
        .json()
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bot = %config.bot_name,
        "Starting Valknut Server"
    );
    if config.owner_id.is_none() {
        tracing::warn!("OWNER_ID not set, owner-only routes and commands are unreachable");
    }

    // Initialize database
    let db_pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&db_pool).await?;
    let store = Arc::new(db::PgStore::new(db_pool));

    // Platform client used by sync and permission checks
    let platform = Arc::new(DiscordClient::new(
        &config.discord_api_base,
        &config.discord_token,
        config.platform_timeout(),
    )?);

    // Build application state
    let state = api::AppState::new(store, platform, config.clone())?;

    // Background role synchronization
    let sync_task = spawn_role_sync_task(state.sync.clone(), config.role_sync_interval());
    let purge_task = spawn_session_purge_task(state.store.clone(), SESSION_PURGE_INTERVAL);

    // Build router
    let app = api::create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!(address = %config.bind_address, "Server listening");

    // Graceful shutdown handler
    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
        }
        info!("Received shutdown signal, cleaning up...");
    };

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await?;

    sync_task.abort();
    purge_task.abort();
    info!("Server shutdown complete");

    Ok(())
}
