//! Database Layer
//!
//! `PostgreSQL` connection plus the [`AccessStore`] abstraction the access
//! control core is written against.

#[cfg(test)]
pub mod memory;
mod models;
mod queries;
mod store;


use std::time::Duration;

use anyhow::Result;
pub use models::*;
pub use queries::PgStore;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
pub use store::{AccessStore, StoreError, StoreResult};
use tracing::info;

/// Create `PostgreSQL` connection pool with health configuration.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .min_connections(2)
        .max_connections(10)
        // Prevent hanging requests on pool exhaustion
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .test_before_acquire(true)
        .connect(database_url)
        .await?;

    info!("Connected to PostgreSQL");
    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations completed");
    Ok(())
}
