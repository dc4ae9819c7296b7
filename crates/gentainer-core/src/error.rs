//! Error types for gentainer-core.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for gentainer-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur while reconciling host resources.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Named container or resource is absent
    #[error("{kind} not found: {name}")]
    NotFound {
        /// What was looked up (container, layer, interface, ...)
        kind: &'static str,
        /// Identity of the missing resource
        name: String,
    },

    /// Cyclic or malformed base image chain
    #[error("invalid base image chain for {container}: {reason}")]
    Graph { container: String, reason: String },

    /// Resource is already present and force is not set
    #[error("{kind} already exists: {name}")]
    AlreadyExists { kind: &'static str, name: String },

    /// Declared value diverges from the observed one and force is not set
    #[error("{resource}: declared {declared}, found {observed}")]
    Conflict {
        resource: String,
        declared: String,
        observed: String,
    },

    /// An entry appeared between planning and appending it
    #[error("duplicate usernet entry for {username} on {interface} in {}", .path.display())]
    DuplicateEntry {
        username: String,
        interface: String,
        path: PathBuf,
    },

    /// A line expected verbatim was not found while rewriting a file
    #[error("expected line not found in {}: {line:?}", .path.display())]
    StaleEntry { path: PathBuf, line: String },

    /// Malformed persisted record
    #[error("invalid entry at {}:{line_number}: {line:?}", .path.display())]
    Parse {
        path: PathBuf,
        line_number: usize,
        line: String,
    },

    /// A file that must exist is missing
    #[error("file does not exist: {}", .0.display())]
    MissingFile(PathBuf),

    /// No layer backing registered under this kind
    #[error("directory backing not implemented: {0}")]
    UnsupportedBacking(String),

    /// Account creation failed
    #[error("failed to create user {username}: {output}")]
    UserCreation { username: String, output: String },

    /// The layer backing tool failed
    #[error("layer operation failed for {}: {output}", .path.display())]
    BackingTool { path: PathBuf, output: String },

    /// The package installer failed
    #[error("package installation failed for {container}: {output}")]
    Install { container: String, output: String },

    /// Declared packages the package tree does not provide
    #[error("[{container}] packages do not exist: {}", .packages.join(", "))]
    UnknownPackages {
        container: String,
        packages: Vec<String>,
    },

    /// Unknown or ill-typed declared configuration
    #[error("invalid configuration in {source_name}: {message}")]
    Validation {
        /// File or section the value came from
        source_name: String,
        message: String,
    },

    /// Two config modules declare the same parameter
    #[error("[{module}] parameter already registered: {parameter}")]
    DuplicateParameter { module: String, parameter: String },

    /// A container requires interfaces the host does not have
    #[error("[{container}] network interfaces do not exist: {}", .interfaces.join(", "))]
    MissingInterfaces {
        container: String,
        interfaces: Vec<String>,
    },

    /// Several independent operations failed in one call
    #[error("{}", AggregateDisplay(.0))]
    Aggregate(Vec<CoreError>),

    /// Ownership of a path could not be corrected
    #[error("failed to set ownership of {}: {source}", .path.display())]
    Ownership {
        path: PathBuf,
        #[source]
        source: nix::errno::Errno,
    },

    /// Error from gentainer-host
    #[error(transparent)]
    Host(#[from] gentainer_host::HostError),

    /// A blocking filesystem task panicked or was cancelled
    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML syntax error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

struct AggregateDisplay<'a>(&'a [CoreError]);

impl fmt::Display for AggregateDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} operations failed", self.0.len())?;
        for err in self.0 {
            write!(f, "; {}", err)?;
        }
        Ok(())
    }
}

impl CoreError {
    pub(crate) fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        CoreError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub(crate) fn already_exists(kind: &'static str, name: impl Into<String>) -> Self {
        CoreError::AlreadyExists {
            kind,
            name: name.into(),
        }
    }

    pub(crate) fn validation(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::Validation {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Collapse per-item failures: none is success, one is returned as-is.
    pub(crate) fn collect(mut errors: Vec<CoreError>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(CoreError::Aggregate(errors)),
        }
    }

    /// Check if this error indicates a not-found condition.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CoreError::NotFound { .. } | CoreError::MissingFile(_) | CoreError::UnknownPackages { .. }
        )
    }

    /// Check if this error is a refusal that `force` would override.
    pub fn is_refusal(&self) -> bool {
        match self {
            CoreError::AlreadyExists { .. } | CoreError::Conflict { .. } => true,
            CoreError::Aggregate(errors) => errors.iter().all(CoreError::is_refusal),
            _ => false,
        }
    }
}
