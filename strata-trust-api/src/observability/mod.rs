//! Tracing setup for the operator CLI

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};

/// Install the global subscriber; logs go to stderr so stdout stays machine readable.
///
/// Returns `false` when a subscriber was already installed; the process keeps
/// running with whatever subscriber is in place. An unparsable filter falls
/// back to `info`.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let filter = match EnvFilter::try_new(&config.filter) {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("info"),
    };

    let installed = match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };
    installed.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_degrades_silently() {
        let config = LoggingConfig {
            format: LogFormat::Json,
            filter: "not a [valid filter".to_string(),
        };
        let _ = init_tracing(&config);
        assert!(!init_tracing(&LoggingConfig::default()));
    }
}
