//! Storage layers.
//!
//! Each container gets one layer at `<build_dir>/<container>`, either a
//! fresh volume or a snapshot of its base image's layer. The backing is
//! chosen by kind from a [`BackingTable`].

use crate::error::{CoreError, Result};
use gentainer_host::{Btrfs, HostError, LayerBacking};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Registered layer backings, keyed by kind.
#[derive(Clone, Default)]
pub struct BackingTable {
    backings: HashMap<&'static str, Arc<dyn LayerBacking>>,
}

impl BackingTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with every built-in backing.
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        table.register(Arc::new(Btrfs::new()));
        table
    }

    /// Register `backing` under its kind, replacing any previous one.
    pub fn register(&mut self, backing: Arc<dyn LayerBacking>) -> Option<Arc<dyn LayerBacking>> {
        self.backings.insert(backing.kind(), backing)
    }

    pub fn get(&self, kind: &str) -> Result<Arc<dyn LayerBacking>> {
        self.backings
            .get(kind)
            .cloned()
            .ok_or_else(|| CoreError::UnsupportedBacking(kind.to_string()))
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.backings.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }
}

impl fmt::Debug for BackingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackingTable")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// A prepared layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayer {
    pub container: String,
    pub path: PathBuf,
    pub backing: &'static str,
    /// Layer this one was snapshotted from.
    pub base: Option<PathBuf>,
}

/// Creates, snapshots and removes container layers.
pub struct LayerManager {
    build_dir: PathBuf,
    backing: Arc<dyn LayerBacking>,
}

impl LayerManager {
    pub fn new(build_dir: impl Into<PathBuf>, backing: Arc<dyn LayerBacking>) -> Self {
        Self {
            build_dir: build_dir.into(),
            backing,
        }
    }

    /// Manager using the backing registered as `kind`.
    pub fn from_table(build_dir: impl Into<PathBuf>, table: &BackingTable, kind: &str) -> Result<Self> {
        Ok(Self::new(build_dir, table.get(kind)?))
    }

    pub fn layer_path(&self, container: &str) -> PathBuf {
        self.build_dir.join(container)
    }

    /// Create the layer for `container`, snapshotting `base` when given.
    ///
    /// An existing layer is refused unless `force`, in which case it is
    /// deleted first.
    pub async fn prepare(&self, container: &str, base: Option<&str>, force: bool) -> Result<StorageLayer> {
        let path = self.layer_path(container);
        let base_path = base.map(|b| self.layer_path(b));

        if let Some(base_path) = &base_path {
            if !tokio::fs::try_exists(base_path).await? {
                return Err(CoreError::not_found("base layer", base_path.display().to_string()));
            }
        }

        if tokio::fs::try_exists(&path).await? {
            if !force {
                return Err(CoreError::already_exists("layer", path.display().to_string()));
            }
            tracing::warn!(container = %container, path = %path.display(), "Layer exists, deleting");
            self.delete(&path).await?;
        }

        tokio::fs::create_dir_all(&self.build_dir).await?;

        match &base_path {
            Some(base_path) => {
                tracing::info!(
                    container = %container,
                    base = %base_path.display(),
                    backing = self.backing.kind(),
                    "Snapshotting layer"
                );
                self.backing
                    .snapshot(base_path, &path)
                    .await
                    .map_err(|e| backing_error(&path, e))?;
            }
            None => {
                tracing::info!(container = %container, backing = self.backing.kind(), "Creating layer");
                self.backing
                    .create(&path)
                    .await
                    .map_err(|e| backing_error(&path, e))?;
            }
        }

        Ok(StorageLayer {
            container: container.to_string(),
            path,
            backing: self.backing.kind(),
            base: base_path,
        })
    }

    /// Remove the layer for `container`.
    pub async fn clean(&self, container: &str) -> Result<()> {
        let path = self.layer_path(container);
        if !tokio::fs::try_exists(&path).await? {
            return Err(CoreError::not_found("layer", path.display().to_string()));
        }
        tracing::info!(container = %container, path = %path.display(), "Deleting layer");
        self.delete(&path).await
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        self.backing
            .delete(path)
            .await
            .map_err(|e| backing_error(path, e))
    }
}

fn backing_error(path: &Path, err: HostError) -> CoreError {
    match err {
        HostError::ToolFailed { stderr, .. } => CoreError::BackingTool {
            path: path.to_path_buf(),
            output: stderr,
        },
        other => CoreError::Host(other),
    }
}
