//! gentainer entry point.
//!
//! Loads the global config, then the container and network configs it
//! points at, and runs one reconciliation command against the host.

mod cli;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Command};
use gentainer_core::{Gentainer, GlobalConfig, HostTools};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over -d
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level()));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = GlobalConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::debug!(?config, "Configuration loaded");

    let gentainer = Gentainer::load(config, HostTools::system(), cli.force)?;

    match cli.command {
        Command::List { filter } => print!("{}", gentainer.list(filter.as_deref())),
        Command::Prepare { container } => gentainer.prepare(&container).await?,
        Command::Build { container } => gentainer.build(&container).await?,
        Command::Clean { container } => gentainer.clean(&container).await?,
        Command::Check { container } => gentainer.check(&container).await?,
        Command::NetPrepare { interfaces } => gentainer.net_prepare(&interfaces).await?,
        Command::NetClean { interfaces } => gentainer.net_clean(&interfaces).await?,
    }

    Ok(())
}
