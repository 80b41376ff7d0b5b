//! Environment-driven configuration

use std::str::FromStr;

use strata_trust::models::OpeningBalanceAccounts;
use thiserror::Error;

use crate::database::DatabaseConfig;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {variable}: '{value}' ({reason})")]
    InvalidValue {
        variable: &'static str,
        value: String,
        reason: String,
    },
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}', expected pretty or json", other)),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// `EnvFilter` directives
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            filter: "info".to_string(),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub opening_accounts: OpeningBalanceAccounts,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create configuration from any variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_defaults = DatabaseConfig::default();
        let account_defaults = OpeningBalanceAccounts::default();

        let database = DatabaseConfig {
            database_url: lookup("DATABASE_URL").unwrap_or(database_defaults.database_url),
            max_connections: parse_var(&lookup, "DATABASE_MAX_CONNECTIONS", database_defaults.max_connections)?,
            connection_timeout_seconds: parse_var(
                &lookup,
                "DATABASE_ACQUIRE_TIMEOUT_SECS",
                database_defaults.connection_timeout_seconds,
            )?,
        };
        if database.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                variable: "DATABASE_MAX_CONNECTIONS",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let opening_accounts = OpeningBalanceAccounts {
            control_code: lookup("OPENING_BALANCE_CONTROL_CODE").unwrap_or(account_defaults.control_code),
            receivable_code: lookup("LOT_RECEIVABLE_CODE").unwrap_or(account_defaults.receivable_code),
        };

        let logging = LoggingConfig {
            format: parse_var(&lookup, "LOG_FORMAT", LogFormat::Pretty)?,
            filter: lookup("RUST_LOG").unwrap_or_else(|| LoggingConfig::default().filter),
        };

        Ok(Self {
            database,
            opening_accounts,
            logging,
        })
    }
}

fn parse_var<F, T>(lookup: &F, variable: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(variable) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            variable,
            reason: e.to_string(),
            value,
        }),
    }
}
