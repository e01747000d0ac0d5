//! ClipKeep - clipboard history manager
//!
//! This is the main entry point for the `clipkeep` command.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clipkeep::cli::{Cli, CliHandler};
use clipkeep::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load_config(cli.config.as_deref()).context("Failed to load configuration")?;

    // Initialize logging
    let log_level = if cli.verbose {
        "debug"
    } else {
        config.log_level.as_str()
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("clipkeep={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    debug!(
        "ClipKeep v{} ({} {}, {}, built {})",
        clipkeep::VERSION,
        env!("TARGET"),
        env!("PROFILE"),
        env!("RUSTC_VERSION"),
        env!("BUILD_DATE")
    );

    let mut handler = CliHandler::new(config, cli.config);
    handler.handle_command(cli.command).await?;

    Ok(())
}
