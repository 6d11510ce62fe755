//! MeshChat CLI entry point

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use meshchat_cli::{Cli, CommandDispatcher};
use meshchat_core::MeshChatConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let config = load_configuration(&cli)?;

    CommandDispatcher::execute(cli, config).await
}

/// Setup logging from RUST_LOG, falling back to the verbosity flag
fn setup_logging(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Load configuration from file or use defaults
fn load_configuration(cli: &Cli) -> Result<MeshChatConfig> {
    match &cli.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            MeshChatConfig::load_from_file(path)
                .with_context(|| format!("invalid configuration in {}", path.display()))
        }
        None => {
            info!("Using default configuration");
            Ok(MeshChatConfig::default())
        }
    }
}
