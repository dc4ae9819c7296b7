//! System identity database: account lookup and creation.

use crate::command::{run, CommandOutput};
use crate::error::{HostError, Result};
use async_trait::async_trait;
use nix::unistd::User;
use std::ffi::OsString;
use std::path::PathBuf;

/// An account as recorded in the passwd database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// Login name.
    pub name: String,
    /// Numeric user id.
    pub uid: u32,
    /// Primary group id.
    pub gid: u32,
    /// Home directory.
    pub home: PathBuf,
}

impl From<User> for Account {
    fn from(user: User) -> Self {
        Self {
            name: user.name,
            uid: user.uid.as_raw(),
            gid: user.gid.as_raw(),
            home: user.dir,
        }
    }
}

/// Account lookup and creation.
#[async_trait]
pub trait IdentityDb: Send + Sync {
    /// Look up `username`, `None` when no such account exists.
    async fn lookup(&self, username: &str) -> Result<Option<Account>>;

    /// Create `username` with a home directory and the given supplementary groups.
    async fn create_account(&self, username: &str, groups: &[String]) -> Result<CommandOutput>;
}

/// passwd lookups through libc, account creation through `useradd`.
#[derive(Debug, Clone)]
pub struct SystemIdentity {
    useradd: PathBuf,
}

impl Default for SystemIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemIdentity {
    /// Use `useradd` from `$PATH`.
    pub fn new() -> Self {
        Self::with_useradd("useradd")
    }

    /// Use a specific `useradd` binary.
    pub fn with_useradd(useradd: impl Into<PathBuf>) -> Self {
        Self {
            useradd: useradd.into(),
        }
    }

    fn useradd_args(username: &str, groups: &[String]) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["--create-home".into()];
        if !groups.is_empty() {
            args.push("--groups".into());
            args.push(groups.join(",").into());
        }
        args.push(username.into());
        args
    }
}

#[async_trait]
impl IdentityDb for SystemIdentity {
    async fn lookup(&self, username: &str) -> Result<Option<Account>> {
        let user = User::from_name(username).map_err(|source| HostError::Identity {
            username: username.to_string(),
            source,
        })?;
        Ok(user.map(Account::from))
    }

    async fn create_account(&self, username: &str, groups: &[String]) -> Result<CommandOutput> {
        tracing::info!(username = %username, groups = ?groups, "Creating account");
        run(&self.useradd, Self::useradd_args(username, groups)).await
    }
}
