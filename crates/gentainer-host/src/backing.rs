//! Copy-on-write layer backings.

use crate::command::run;
use crate::error::Result;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// A filesystem technology able to hold container layers.
///
/// Implementations are registered by [`kind`](LayerBacking::kind) and
/// looked up from the `dir_backing` setting.
#[async_trait]
pub trait LayerBacking: Send + Sync {
    /// Identifier used in configuration, e.g. `btrfs`.
    fn kind(&self) -> &'static str;

    /// Create an empty layer at `path`.
    async fn create(&self, path: &Path) -> Result<()>;

    /// Create `dest` as a copy-on-write snapshot of `source`.
    async fn snapshot(&self, source: &Path, dest: &Path) -> Result<()>;

    /// Delete the layer at `path`.
    async fn delete(&self, path: &Path) -> Result<()>;
}

/// btrfs subvolumes, driven through the `btrfs` CLI.
#[derive(Debug, Clone)]
pub struct Btrfs {
    binary: PathBuf,
}

impl Default for Btrfs {
    fn default() -> Self {
        Self::new()
    }
}

impl Btrfs {
    /// Backing identifier.
    pub const KIND: &'static str = "btrfs";

    /// Use `btrfs` from `$PATH`.
    pub fn new() -> Self {
        Self::with_binary("btrfs")
    }

    /// Use a specific `btrfs` binary.
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn create_args(path: &Path) -> Vec<OsString> {
        vec!["subvolume".into(), "create".into(), path.into()]
    }

    fn snapshot_args(source: &Path, dest: &Path) -> Vec<OsString> {
        vec![
            "subvolume".into(),
            "snapshot".into(),
            source.into(),
            dest.into(),
        ]
    }

    fn delete_args(path: &Path) -> Vec<OsString> {
        vec!["subvolume".into(), "delete".into(), path.into()]
    }
}

#[async_trait]
impl LayerBacking for Btrfs {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    async fn create(&self, path: &Path) -> Result<()> {
        tracing::info!(path = %path.display(), "Creating btrfs subvolume");
        run(&self.binary, Self::create_args(path)).await?;
        Ok(())
    }

    async fn snapshot(&self, source: &Path, dest: &Path) -> Result<()> {
        tracing::info!(
            source = %source.display(),
            dest = %dest.display(),
            "Creating btrfs snapshot"
        );
        run(&self.binary, Self::snapshot_args(source, dest)).await?;
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        tracing::info!(path = %path.display(), "Deleting btrfs subvolume");
        run(&self.binary, Self::delete_args(path)).await?;
        Ok(())
    }
}
