//! Database layer: connection pooling, migrations and the SQL repository
//!
//! Supports both SQLite (development) and PostgreSQL (production) through the
//! same schema.

pub mod connection;
pub mod repositories;

pub use connection::{initialize_database, DatabaseConfig, DatabasePool};
pub use repositories::SqlTrustRepository;
