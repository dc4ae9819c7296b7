//! Package lookup and installation into a layer root.

use crate::command::{run, CommandOutput};
use crate::error::{HostError, Result};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Installs packages into an alternate root.
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    /// Install `packages` into `root`, returning the captured tool output.
    async fn install(&self, root: &Path, packages: &[String]) -> Result<CommandOutput>;

    /// Whether the host package tree provides a visible version of `atom`.
    async fn package_exists(&self, atom: &str) -> Result<bool>;
}

/// Root whose package tree atoms are resolved against.
const TREE_ROOT: &str = "/";

/// Portage's `emerge --root`, with lookups through `portageq`.
#[derive(Debug, Clone)]
pub struct Emerge {
    binary: PathBuf,
    portageq: PathBuf,
}

impl Default for Emerge {
    fn default() -> Self {
        Self::new()
    }
}

impl Emerge {
    /// Use `emerge` from `$PATH`.
    pub fn new() -> Self {
        Self::with_binary("emerge")
    }

    /// Use a specific `emerge` binary.
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            portageq: PathBuf::from("portageq"),
        }
    }

    /// Use a specific `portageq` binary for package lookups.
    pub fn with_portageq(mut self, portageq: impl Into<PathBuf>) -> Self {
        self.portageq = portageq.into();
        self
    }

    fn lookup_args(atom: &str) -> Vec<OsString> {
        vec!["best_visible".into(), TREE_ROOT.into(), "ebuild".into(), atom.into()]
    }

    fn args(root: &Path, packages: &[String]) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["--root".into(), root.into()];
        args.extend(packages.iter().map(OsString::from));
        args
    }
}

#[async_trait]
impl PackageInstaller for Emerge {
    async fn install(&self, root: &Path, packages: &[String]) -> Result<CommandOutput> {
        tracing::info!(root = %root.display(), packages = ?packages, "Installing packages");
        run(&self.binary, Self::args(root, packages)).await
    }

    async fn package_exists(&self, atom: &str) -> Result<bool> {
        // portageq exits 1 when nothing matches
        match run(&self.portageq, Self::lookup_args(atom)).await {
            Ok(output) => {
                let best = output.stdout.trim();
                tracing::debug!(atom = %atom, best = %best, "Resolved package");
                Ok(!best.is_empty())
            }
            Err(HostError::ToolFailed { exit_code: 1, .. }) => {
                tracing::debug!(atom = %atom, "No visible package");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}
