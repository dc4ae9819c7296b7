//! Command line definition.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Build and reconcile host resources for unprivileged LXC containers.
#[derive(Debug, Parser)]
#[command(name = "gentainer", version, about)]
pub struct Cli {
    /// Global config file
    #[arg(short, long, env = "GENTAINER_CONFIG", default_value = "config.toml")]
    pub config: PathBuf,

    /// Replace existing or diverging host state
    #[arg(long, global = true)]
    pub force: bool,

    /// Increase log verbosity (-d debug, -dd trace)
    #[arg(short = 'd', long = "debug", action = clap::ArgAction::Count, global = true)]
    pub debug: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show declared containers and host interfaces
    List {
        /// Only containers whose name contains this
        filter: Option<String>,
    },
    /// Set up networks and the container user without building
    Prepare { container: String },
    /// Build a container and its base image chain
    Build { container: String },
    /// Delete a container's layer
    Clean { container: String },
    /// Verify a container's required interfaces exist
    Check { container: String },
    /// Create host interfaces (all declared when none given)
    NetPrepare { interfaces: Vec<String> },
    /// Delete host interfaces (all declared when none given)
    NetClean { interfaces: Vec<String> },
}

impl Cli {
    /// Log filter implied by `-d` when `RUST_LOG` is unset.
    pub fn log_level(&self) -> &'static str {
        match self.debug {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
