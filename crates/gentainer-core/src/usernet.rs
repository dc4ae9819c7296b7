//! LXC usernet file.
//!
//! One `<user> <type> <link> <count>` record per line; blank lines and `#`
//! comments are preserved. Every read-modify-write holds an exclusive
//! `flock` on the file and re-reads its contents under the lock.

use crate::error::{CoreError, Result};
use nix::fcntl::{Flock, FlockArg};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{File, OpenOptions, Permissions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Link type gentainer manages.
pub const VETH: &str = "veth";

/// Mode of a freshly created usernet file.
pub const USERNET_MODE: u32 = 0o644;

/// One usernet record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsernetEntry {
    pub username: String,
    pub kind: String,
    pub interface: String,
    pub count: u32,
}

impl UsernetEntry {
    pub fn veth(username: impl Into<String>, interface: impl Into<String>, count: u32) -> Self {
        Self {
            username: username.into(),
            kind: VETH.to_string(),
            interface: interface.into(),
            count,
        }
    }

    /// Parse one non-comment line. `None` if the line is not exactly four
    /// fields ending in a non-negative count.
    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split_whitespace();
        let entry = Self {
            username: fields.next()?.to_string(),
            kind: fields.next()?.to_string(),
            interface: fields.next()?.to_string(),
            count: fields.next()?.parse().ok()?,
        };
        fields.next().is_none().then_some(entry)
    }
}

impl fmt::Display for UsernetEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} {}", self.username, self.kind, self.interface, self.count)
    }
}

/// Entry with the literal line it was read from.
#[derive(Debug, Clone)]
struct ParsedEntry {
    entry: UsernetEntry,
    line: String,
}

fn parse_contents(path: &Path, contents: &str) -> Result<Vec<ParsedEntry>> {
    let mut entries = Vec::new();
    for (index, line) in contents.split_inclusive('\n').map(line_body).enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let entry = UsernetEntry::parse(trimmed).ok_or_else(|| CoreError::Parse {
            path: path.to_path_buf(),
            line_number: index + 1,
            line: line.to_string(),
        })?;
        entries.push(ParsedEntry {
            entry,
            line: line.to_string(),
        });
    }
    Ok(entries)
}

/// A line without its `\n` or `\r\n` terminator.
fn line_body(raw: &str) -> &str {
    match raw.strip_suffix('\n') {
        Some(body) => body.strip_suffix('\r').unwrap_or(body),
        None => raw,
    }
}

fn same_record(a: &UsernetEntry, b: &UsernetEntry) -> bool {
    a.username == b.username && a.kind == b.kind && a.interface == b.interface
}

/// What [`UsernetFile::reconcile`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub unchanged: Vec<String>,
}

impl ReconcileSummary {
    /// True when nothing was written.
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty()
    }
}

enum Action {
    Append(UsernetEntry),
    Replace { old: String, new: UsernetEntry },
}

/// Handle on the usernet file at a fixed path.
#[derive(Debug, Clone)]
pub struct UsernetFile {
    path: PathBuf,
}

impl UsernetFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Create the file with mode 0644. With `force` an existing file is
    /// truncated. Returns whether anything was written.
    pub fn ensure(&self, force: bool) -> Result<bool> {
        if self.exists() && !force {
            tracing::warn!(path = %self.path.display(), "Usernet file already exists");
            return Ok(false);
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;
        std::fs::set_permissions(&self.path, Permissions::from_mode(USERNET_MODE))?;
        tracing::info!(path = %self.path.display(), "Created usernet file");
        Ok(true)
    }

    fn open_locked(&self, arg: FlockArg, write: bool) -> Result<Flock<File>> {
        let file = OpenOptions::new()
            .read(true)
            .write(write)
            .open(&self.path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => CoreError::MissingFile(self.path.clone()),
                _ => CoreError::Io(e),
            })?;
        Flock::lock(file, arg).map_err(|(_, errno)| CoreError::Io(errno.into()))
    }

    fn read_locked(&self, file: &mut File) -> Result<(String, Vec<ParsedEntry>)> {
        let mut contents = String::new();
        file.seek(SeekFrom::Start(0))?;
        file.read_to_string(&mut contents)?;
        let entries = parse_contents(&self.path, &contents)?;
        Ok((contents, entries))
    }

    /// Every record in the file.
    pub fn entries(&self) -> Result<Vec<UsernetEntry>> {
        let mut file = self.open_locked(FlockArg::LockShared, false)?;
        let (_, entries) = self.read_locked(&mut file)?;
        Ok(entries.into_iter().map(|p| p.entry).collect())
    }

    fn lines_for(
        &self,
        entries: &[ParsedEntry],
        username: &str,
    ) -> BTreeMap<String, Vec<ParsedEntry>> {
        let mut found: BTreeMap<String, Vec<ParsedEntry>> = BTreeMap::new();
        for parsed in entries {
            let entry = &parsed.entry;
            if entry.username != username || entry.kind != VETH {
                continue;
            }
            found
                .entry(entry.interface.clone())
                .or_default()
                .push(parsed.clone());
        }
        found
    }

    /// Append `entry`, failing if its user already has a record for the
    /// same interface.
    pub fn append(&self, entry: &UsernetEntry) -> Result<()> {
        let mut file = self.open_locked(FlockArg::LockExclusive, true)?;
        let (contents, entries) = self.read_locked(&mut file)?;
        if entries.iter().any(|p| same_record(&p.entry, entry)) {
            return Err(CoreError::DuplicateEntry {
                username: entry.username.clone(),
                interface: entry.interface.clone(),
                path: self.path.clone(),
            });
        }

        let mut record = String::new();
        if !contents.is_empty() && !contents.ends_with('\n') {
            record.push('\n');
        }
        record.push_str(&entry.to_string());
        record.push('\n');

        file.seek(SeekFrom::End(0))?;
        file.write_all(record.as_bytes())?;
        file.sync_all()?;
        tracing::info!(path = %self.path.display(), entry = %entry, "Added usernet entry");
        Ok(())
    }

    /// Replace the line that reads exactly `old` with `new`.
    ///
    /// Later lines recording the same user and interface are dropped. Line
    /// terminators and every unrelated line are kept byte for byte.
    pub fn replace(&self, old: &str, new: &UsernetEntry) -> Result<()> {
        let mut file = self.open_locked(FlockArg::LockExclusive, true)?;
        let (contents, _) = self.read_locked(&mut file)?;

        let mut replaced = false;
        let mut dropped = 0usize;
        let mut rewritten = String::with_capacity(contents.len());
        for raw in contents.split_inclusive('\n') {
            let body = line_body(raw);
            if !replaced && body == old {
                rewritten.push_str(&new.to_string());
                rewritten.push_str(&raw[body.len()..]);
                replaced = true;
            } else if replaced && UsernetEntry::parse(body).is_some_and(|e| same_record(&e, new)) {
                dropped += 1;
            } else {
                rewritten.push_str(raw);
            }
        }
        if !replaced {
            return Err(CoreError::StaleEntry {
                path: self.path.clone(),
                line: old.to_string(),
            });
        }

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(rewritten.as_bytes())?;
        file.sync_all()?;
        tracing::info!(
            path = %self.path.display(),
            old = %old,
            new = %new,
            dropped,
            "Updated usernet entry"
        );
        Ok(())
    }

    /// Bring `username`'s veth records in line with `allocation`.
    ///
    /// Every conflict is evaluated before anything is written; without
    /// `force` any count mismatch aborts the whole call. Repeated records
    /// for one interface are collapsed into one under `force`.
    pub fn reconcile(
        &self,
        username: &str,
        allocation: &BTreeMap<String, u32>,
        force: bool,
    ) -> Result<ReconcileSummary> {
        let existing = {
            let mut file = self.open_locked(FlockArg::LockShared, false)?;
            let (_, entries) = self.read_locked(&mut file)?;
            self.lines_for(&entries, username)
        };

        let mut summary = ReconcileSummary::default();
        let mut actions = Vec::new();
        let mut conflicts = Vec::new();
        for (interface, &count) in allocation {
            let desired = UsernetEntry::veth(username, interface.as_str(), count);
            let Some(current) = existing.get(interface).filter(|c| !c.is_empty()) else {
                actions.push(Action::Append(desired));
                continue;
            };
            let matching = current.iter().all(|p| p.entry.count == count);
            if current.len() > 1 {
                tracing::warn!(
                    path = %self.path.display(),
                    username = %username,
                    interface = %interface,
                    records = current.len(),
                    "Duplicate usernet entries"
                );
            }
            if matching && (current.len() == 1 || !force) {
                tracing::debug!(entry = %desired, "Usernet entry up to date");
                summary.unchanged.push(interface.clone());
                continue;
            }
            if force {
                actions.push(Action::Replace {
                    old: current[0].line.clone(),
                    new: desired,
                });
                continue;
            }
            let observed = current
                .iter()
                .map(|p| p.entry.count.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            tracing::warn!(
                username = %username,
                interface = %interface,
                declared = count,
                observed = %observed,
                "Usernet count mismatch"
            );
            conflicts.push(CoreError::Conflict {
                resource: format!(
                    "usernet entry {} {} {} in {}",
                    username,
                    VETH,
                    interface,
                    self.path.display()
                ),
                declared: count.to_string(),
                observed,
            });
        }
        CoreError::collect(conflicts)?;

        for action in actions {
            match action {
                Action::Append(entry) => {
                    self.append(&entry)?;
                    summary.added.push(entry.interface);
                }
                Action::Replace { old, new } => {
                    self.replace(&old, &new)?;
                    summary.updated.push(new.interface);
                }
            }
        }
        Ok(summary)
    }
}
