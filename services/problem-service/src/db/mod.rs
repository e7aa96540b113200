//! Database layer for the problem desk.
//!
//! This module provides:
//! - Connection pool management and migrations
//! - Problem queries and writes (`problems`)
//! - Technician workload reads and writes (`technicians`)
//! - The outbound message queue (`outbox`)
//!
//! Query functions take any Postgres executor, so the same function runs
//! against the pool for plain reads or inside a transaction (`&mut *tx`)
//! when several records must change together.

mod error;
pub mod outbox;
pub mod problems;
pub mod technicians;

pub use error::DbError;

use std::path::PathBuf;
use std::time::Duration;

use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};

/// Pool settings. Filled from the environment by `Config`.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/desk".to_string(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// Shared handle on the problem desk database.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections.min(config.max_connections))
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .max_lifetime(Some(config.max_lifetime))
            .connect(&config.database_url)
            .await
            .map_err(DbError::Connect)?;

        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Database pool ready"
        );
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<(), DbError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(DbError::Query)?;
        Ok(())
    }

    /// Apply the bundled migrations. Dev mode and tests only; production
    /// migrates out of band.
    pub async fn run_migrations(&self) -> Result<(), DbError> {
        let candidates = migration_dirs();
        let Some(dir) = candidates.iter().find(|dir| dir.is_dir()) else {
            return Err(DbError::MigrationDirNotFound {
                tried: candidates
                    .iter()
                    .map(|dir| dir.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        };

        debug!(migrations_dir = %dir.display(), "Loading migrations");
        let migrator = Migrator::new(dir.clone()).await.map_err(DbError::Migration)?;
        migrator.run(&self.pool).await.map_err(DbError::Migration)?;

        info!(migrations_dir = %dir.display(), "Database migrations applied");
        Ok(())
    }
}

/// Where the migrations may live, depending on the working directory.
fn migration_dirs() -> Vec<PathBuf> {
    vec![
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations"),
        PathBuf::from("services/problem-service/migrations"),
        PathBuf::from("migrations"),
    ]
}
