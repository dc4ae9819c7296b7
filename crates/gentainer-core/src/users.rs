//! Container users.
//!
//! Ensures the account exists, its LXC container directory is present and
//! owned by it, and its usernet allocation is recorded.

use crate::error::{CoreError, Result};
use crate::usernet::{ReconcileSummary, UsernetFile};
use gentainer_host::{Account, HostError, IdentityDb};
use nix::unistd::{chown, Gid, Uid};
use std::collections::BTreeMap;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Path under the user's home holding their containers.
pub const CONTAINER_HOME: [&str; 3] = [".local", "share", "lxc"];

/// Reconciles container users.
pub struct UserManager {
    identity: Arc<dyn IdentityDb>,
    usernet: UsernetFile,
    groups: Vec<String>,
    force: bool,
}

impl UserManager {
    pub fn new(identity: Arc<dyn IdentityDb>, usernet_file: impl Into<PathBuf>, force: bool) -> Self {
        Self {
            identity,
            usernet: UsernetFile::new(usernet_file),
            groups: Vec::new(),
            force,
        }
    }

    /// Supplementary groups for created accounts.
    pub fn with_groups(mut self, groups: Vec<String>) -> Self {
        self.groups = groups;
        self
    }

    /// Ensure account, container home and usernet allocation for `container`.
    pub async fn prepare(
        &self,
        username: &str,
        allocation: &BTreeMap<String, u32>,
        container: &str,
    ) -> Result<()> {
        let account = self.ensure_user(username).await?;
        self.ensure_container_home(&account, container).await?;
        if allocation.is_empty() {
            tracing::debug!(username = %username, "No usernet allocation");
            return Ok(());
        }
        let summary = self.prepare_usernets(username, allocation).await?;
        tracing::info!(
            username = %username,
            added = ?summary.added,
            updated = ?summary.updated,
            "Usernet allocation reconciled"
        );
        Ok(())
    }

    /// Look up `username`, creating the account if absent.
    pub async fn ensure_user(&self, username: &str) -> Result<Account> {
        if let Some(account) = self.identity.lookup(username).await? {
            tracing::debug!(username = %username, uid = account.uid, "User exists");
            return Ok(account);
        }

        tracing::info!(username = %username, groups = ?self.groups, "Creating user");
        match self.identity.create_account(username, &self.groups).await {
            Ok(_) => {}
            Err(HostError::ToolFailed { stderr, .. }) => {
                return Err(CoreError::UserCreation {
                    username: username.to_string(),
                    output: stderr,
                })
            }
            Err(e) => return Err(e.into()),
        }

        self.identity
            .lookup(username)
            .await?
            .ok_or_else(|| CoreError::UserCreation {
                username: username.to_string(),
                output: "account not visible after creation".to_string(),
            })
    }

    /// Create `~/.local/share/lxc/<container>`, fixing ownership of the home
    /// directory and every component below it.
    pub async fn ensure_container_home(&self, account: &Account, container: &str) -> Result<PathBuf> {
        let account = account.clone();
        let container = container.to_string();
        tokio::task::spawn_blocking(move || create_container_home(&account, &container)).await?
    }

    /// Reconcile `username`'s usernet records, creating the file if absent.
    pub async fn prepare_usernets(
        &self,
        username: &str,
        allocation: &BTreeMap<String, u32>,
    ) -> Result<ReconcileSummary> {
        let usernet = self.usernet.clone();
        let username = username.to_string();
        let allocation = allocation.clone();
        let force = self.force;
        tokio::task::spawn_blocking(move || {
            if !usernet.exists() {
                usernet.ensure(false)?;
            }
            usernet.reconcile(&username, &allocation, force)
        })
        .await?
    }
}

fn create_container_home(account: &Account, container: &str) -> Result<PathBuf> {
    let home = &account.home;
    if !home.is_absolute() || home.parent().is_none() {
        return Err(CoreError::validation(
            format!("account {}", account.name),
            format!("refusing to manage home directory {}", home.display()),
        ));
    }
    if !home.exists() {
        if let Some(parent) = home.parent() {
            std::fs::create_dir_all(parent)?;
        }
    }
    ensure_owned_dir(home, account)?;

    let mut path = home.clone();
    for component in CONTAINER_HOME.iter().copied().chain(std::iter::once(container)) {
        path.push(component);
        ensure_owned_dir(&path, account)?;
    }
    Ok(path)
}

fn ensure_owned_dir(path: &Path, account: &Account) -> Result<()> {
    match std::fs::metadata(path) {
        Ok(meta) if !meta.is_dir() => {
            return Err(CoreError::Conflict {
                resource: path.display().to_string(),
                declared: "directory".to_string(),
                observed: "file".to_string(),
            })
        }
        Ok(meta) if meta.uid() == account.uid && meta.gid() == account.gid => return Ok(()),
        Ok(meta) => {
            tracing::warn!(
                path = %path.display(),
                uid = meta.uid(),
                gid = meta.gid(),
                "Correcting ownership"
            );
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "Creating directory");
            std::fs::create_dir(path)?;
            let meta = std::fs::metadata(path)?;
            if meta.uid() == account.uid && meta.gid() == account.gid {
                return Ok(());
            }
        }
        Err(e) => return Err(e.into()),
    }

    chown(
        path,
        Some(Uid::from_raw(account.uid)),
        Some(Gid::from_raw(account.gid)),
    )
    .map_err(|source| CoreError::Ownership {
        path: path.to_path_buf(),
        source,
    })
}
