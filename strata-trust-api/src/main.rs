//! Strata Trust CLI

use anyhow::Context;
use clap::Parser;

use strata_trust_api::cli::{self, Cli};
use strata_trust_api::config::AppConfig;
use strata_trust_api::observability::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::from_env().context("Invalid configuration")?;
    cli.apply_overrides(&mut config);
    init_tracing(&config.logging);

    tracing::debug!("Starting strata-trust {}", env!("CARGO_PKG_VERSION"));
    cli::run(cli, config).await
}
