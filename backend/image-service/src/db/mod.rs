/// Database access layer
///
/// This module provides:
/// - Connection pooling and the embedded migrator for the `images` table
/// - The image registry trait and its PostgreSQL implementation
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

use crate::config::DatabaseConfig;

pub mod image_repo;

pub use image_repo::{ImageRegistry, PgImageRegistry};

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Open the pool and apply migrations when enabled
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.url)
        .await?;

    if config.run_migrations {
        MIGRATOR.run(&pool).await?;
        info!("Database migrations completed successfully");
    }

    Ok(pool)
}
