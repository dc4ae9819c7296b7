//! Error types for gentainer-host.

use thiserror::Error;

/// Result type alias for gentainer-host operations.
pub type Result<T> = std::result::Result<T, HostError>;

/// Errors that can occur while driving host tools.
#[derive(Debug, Error)]
pub enum HostError {
    /// The tool could not be started at all
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The tool ran and exited non-zero
    #[error("`{command}` exited with status {exit_code}: {stderr}")]
    ToolFailed {
        /// Rendered command line
        command: String,
        /// Exit code, -1 when killed by a signal
        exit_code: i32,
        /// Captured diagnostic output
        stderr: String,
    },

    /// The tool succeeded but printed something we could not understand
    #[error("unexpected output from {program}: {message}")]
    Output { program: String, message: String },

    /// passwd/group database lookup failed
    #[error("identity lookup failed for {username}: {source}")]
    Identity {
        username: String,
        #[source]
        source: nix::errno::Errno,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_failed_display() {
        let err = HostError::ToolFailed {
            command: "btrfs subvolume create /tmp/x".into(),
            exit_code: 1,
            stderr: "ERROR: not a btrfs filesystem".into(),
        };
        assert_eq!(
            err.to_string(),
            "`btrfs subvolume create /tmp/x` exited with status 1: ERROR: not a btrfs filesystem"
        );
    }

    #[test]
    fn test_output_display() {
        let err = HostError::Output {
            program: "ip".into(),
            message: "bad json".into(),
        };
        assert_eq!(err.to_string(), "unexpected output from ip: bad json");
    }
}
