//! Strata Trust API
//!
//! Operator surface for the trust ledger: environment configuration, tracing
//! setup, the SQLx-backed repository and the `strata-trust` command line.

pub mod cli;
pub mod config;
pub mod database;
pub mod observability;

pub use config::AppConfig;
pub use database::{initialize_database, DatabaseConfig, DatabasePool, SqlTrustRepository};
