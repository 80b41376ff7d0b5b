//! Database connection management with SQLx
//!
//! Provides connection pooling for both PostgreSQL and SQLite; migrations run
//! when a pool is created.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Postgres, Sqlite};
use strata_trust::{LedgerError, Result};
use tracing::info;

/// Database connection pool enum supporting both PostgreSQL and SQLite
#[derive(Clone, Debug)]
pub enum DatabasePool {
    Postgres(Pool<Postgres>),
    Sqlite(Pool<Sqlite>),
}

impl DatabasePool {
    /// Create a new PostgreSQL connection pool
    pub async fn new_postgres(config: &DatabaseConfig) -> Result<Self> {
        info!("Creating PostgreSQL connection pool with {} max connections", config.max_connections);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .connect(&config.database_url)
            .await
            .map_err(|e| LedgerError::Storage(format!("Failed to create PostgreSQL pool: {}", e)))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| LedgerError::Storage(format!("Failed to run migrations: {}", e)))?;

        info!("PostgreSQL connection pool created successfully");
        Ok(DatabasePool::Postgres(pool))
    }

    /// Create a new SQLite connection pool
    pub async fn new_sqlite(config: &DatabaseConfig) -> Result<Self> {
        info!("Creating SQLite connection pool with {} max connections", config.max_connections);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .connect(&config.database_url)
            .await
            .map_err(|e| LedgerError::Storage(format!("Failed to create SQLite pool: {}", e)))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| LedgerError::Storage(format!("Failed to run migrations: {}", e)))?;

        info!("SQLite connection pool created successfully");
        Ok(DatabasePool::Sqlite(pool))
    }

    /// Health check for the database connection
    pub async fn health_check(&self) -> Result<()> {
        match self {
            DatabasePool::Postgres(pool) => {
                sqlx::query("SELECT 1")
                    .fetch_one(pool)
                    .await
                    .map_err(|e| LedgerError::Storage(format!("PostgreSQL health check failed: {}", e)))?;
            }
            DatabasePool::Sqlite(pool) => {
                sqlx::query("SELECT 1")
                    .fetch_one(pool)
                    .await
                    .map_err(|e| LedgerError::Storage(format!("SQLite health check failed: {}", e)))?;
            }
        }
        Ok(())
    }

    pub fn backend(&self) -> &'static str {
        match self {
            DatabasePool::Postgres(_) => "postgres",
            DatabasePool::Sqlite(_) => "sqlite",
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub connection_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://strata_trust.db?mode=rwc".to_string(),
            max_connections: 10,
            connection_timeout_seconds: 30,
        }
    }
}

impl DatabaseConfig {
    /// Configuration for a SQLite database file, created if missing
    pub fn sqlite_file(path: &std::path::Path) -> Self {
        Self {
            database_url: format!("sqlite://{}?mode=rwc", path.display()),
            max_connections: 5,
            ..Self::default()
        }
    }
}

/// Initialize database connection pool based on configuration
pub async fn initialize_database(config: &DatabaseConfig) -> Result<DatabasePool> {
    info!("Initializing database");

    if config.database_url.starts_with("postgres://") || config.database_url.starts_with("postgresql://") {
        DatabasePool::new_postgres(config).await
    } else if config.database_url.starts_with("sqlite:") {
        DatabasePool::new_sqlite(config).await
    } else {
        Err(LedgerError::Storage(
            "Unsupported database URL format. Use postgres:// or sqlite:".to_string(),
        ))
    }
}
