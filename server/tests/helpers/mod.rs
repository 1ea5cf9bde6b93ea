//! Reusable test helpers for HTTP integration tests.
//!
//! Provides `TestApp` for sending requests through the full axum router,
//! plus utilities for seeding communities and opening dashboard sessions.
//!
//! The pool is connected lazily: tests that never touch the store run
//! without `PostgreSQL`. Tests that do are `#[ignore]`d.
//!
//! ## Cleanup Guards
//!
//! Use [`CleanupGuard`] for RAII-based cleanup that runs even if a test panics.
#![allow(dead_code)]

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{self, Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use rand::Rng;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tower::ServiceExt;
use vk_common::{CommunityId, ExternalRoleId, PrincipalId};
use vk_server::api::{create_router, AppState};
use vk_server::auth::session::{start_session, SESSION_COOKIE};
use vk_server::config::Config;
use vk_server::db::{self, AccessStore, NewCommunity, NewRole, PgStore, DEFAULT_ROLE_COLOR};
use vk_server::platform::DiscordClient;

// ============================================================================
// Cleanup Guard
// ============================================================================

/// Async cleanup action type.
type CleanupAction = Box<dyn FnOnce(PgPool) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// RAII guard that runs cleanup actions on drop, even if the test panics.
pub struct CleanupGuard {
    pool: PgPool,
    actions: Vec<CleanupAction>,
}

impl CleanupGuard {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            actions: Vec::new(),
        }
    }

    /// Register a generic async cleanup action.
    pub fn add<F, Fut>(&mut self, action: F)
    where
        F: FnOnce(PgPool) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.actions.push(Box::new(move |pool| Box::pin(action(pool))));
    }

    /// Delete a community; roles and members cascade.
    pub fn delete_community(&mut self, id: CommunityId) {
        self.add(move |pool| async move {
            let _ = sqlx::query("DELETE FROM communities WHERE id = $1")
                .bind(id.get() as i64)
                .execute(&pool)
                .await;
        });
    }

    /// Delete every session, trust record and operator entry of a user.
    pub fn delete_user(&mut self, user: PrincipalId) {
        self.add(move |pool| async move {
            for table in ["dashboard_sessions", "auth_trust", "operators"] {
                let _ = sqlx::query(&format!("DELETE FROM {table} WHERE user_id = $1"))
                    .bind(user.get() as i64)
                    .execute(&pool)
                    .await;
            }
        });
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let actions = std::mem::take(&mut self.actions);
        if actions.is_empty() {
            return;
        }

        let pool = self.pool.clone();
        let handle = tokio::runtime::Handle::current();

        // Spawn a blocking thread to run async cleanup.
        // This works regardless of tokio runtime flavor.
        std::thread::spawn(move || {
            handle.block_on(async move {
                for action in actions {
                    action(pool.clone()).await;
                }
            });
        })
        .join()
        .expect("Cleanup thread panicked");
    }
}

// ============================================================================
// Test App
// ============================================================================

/// A test application wrapping the full axum router.
pub struct TestApp {
    pub router: Router,
    pub pool: PgPool,
    pub store: Arc<PgStore>,
    pub config: Arc<Config>,
}

impl TestApp {
    /// Build the app over a lazily connected pool.
    ///
    /// The platform client points at a closed port, so every platform call
    /// fails as unavailable.
    pub fn new() -> Self {
        Self::with_config(Config::default_for_test())
    }

    pub fn with_config(config: Config) -> Self {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect_lazy(&config.database_url)
            .expect("Invalid test database URL");
        Self::build(pool, config)
    }

    /// Build the app over a connected, migrated pool.
    pub async fn with_database() -> Self {
        let config = Config::default_for_test();
        let pool = db::create_pool(&config.database_url)
            .await
            .expect("Failed to connect to test DB");
        db::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        Self::build(pool, config)
    }

    fn build(pool: PgPool, config: Config) -> Self {
        let store = Arc::new(PgStore::new(pool.clone()));
        let platform = Arc::new(
            DiscordClient::new(
                &config.discord_api_base,
                &config.discord_token,
                config.platform_timeout(),
            )
            .expect("Failed to create platform client"),
        );
        let state = AppState::new(store.clone(), platform, config.clone())
            .expect("Failed to build app state");

        Self {
            router: create_router(state),
            pool,
            store,
            config: Arc::new(config),
        }
    }

    /// Build an HTTP request with the given method and URI.
    pub fn request(method: Method, uri: &str) -> http::request::Builder {
        Request::builder().method(method).uri(uri)
    }

    /// Send a request through the router via `tower::ServiceExt::oneshot`.
    pub async fn oneshot(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("oneshot request failed")
    }

    /// Open a dashboard session and return the `Cookie` header value.
    pub async fn session_cookie(&self, user: PrincipalId, verified: bool) -> String {
        let token = start_session(
            self.store.as_ref(),
            user,
            &format!("user_{user}"),
            verified,
            self.config.session_ttl_secs,
        )
        .await
        .expect("Failed to create session");
        format!("{SESSION_COOKIE}={token}")
    }

    pub fn cleanup_guard(&self) -> CleanupGuard {
        CleanupGuard::new(self.pool.clone())
    }
}

// ============================================================================
// Seed helpers
// ============================================================================

/// Random snowflake in a range real platform ids don't reach yet.
pub fn random_snowflake() -> u64 {
    rand::thread_rng().gen_range(9_000_000_000_000_000_000..9_200_000_000_000_000_000)
}

/// Register a community owned by `owner`.
pub async fn create_community(store: &PgStore, owner: PrincipalId) -> CommunityId {
    let id = CommunityId::new(random_snowflake());
    store
        .upsert_community(&NewCommunity {
            id,
            name: format!("Test Community {id}"),
            owner_id: owner,
        })
        .await
        .expect("Failed to create community");
    id
}

/// Add a platform-linked role to a community's local roster.
pub async fn create_linked_role(store: &PgStore, community: CommunityId, name: &str) -> ExternalRoleId {
    let external = ExternalRoleId::new(random_snowflake());
    store
        .insert_role(&NewRole {
            community_id: community,
            name: name.to_string(),
            external_id: Some(external),
            color: DEFAULT_ROLE_COLOR.to_string(),
            position: 1,
        })
        .await
        .expect("Failed to create role");
    external
}

/// Parse a response body as JSON.
pub async fn body_to_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to collect response body")
        .to_bytes();
    serde_json::from_slice(&bytes).unwrap_or_else(|e| {
        let preview = String::from_utf8_lossy(&bytes);
        panic!("Failed to parse response as JSON: {e}\nBody: {preview}")
    })
}
