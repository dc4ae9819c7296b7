//! External command execution shared by every host tool wrapper.
//!
//! Tools run to completion with no timeout; stdout and stderr are captured
//! and a non-zero exit becomes [`HostError::ToolFailed`].

use crate::error::{HostError, Result};
use std::ffi::{OsStr, OsString};
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, trace};

/// Maximum captured output size in bytes (1 MB).
/// emerge can be very chatty; anything past this is dropped.
const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Captured result of a finished tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, -1 when the process was killed by a signal.
    pub exit_code: i32,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the tool exited with status 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Text to attach to an error: stderr, or stdout when stderr is empty.
    pub fn diagnostics(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

/// Truncate a string to max bytes, preserving UTF-8 boundaries.
fn truncate_output(s: String, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    let mut truncated = s[..end].to_string();
    truncated.push_str("\n... [output truncated]");
    truncated
}

/// Render a command line for logs and error messages.
pub(crate) fn render(program: &Path, args: &[OsString]) -> String {
    let mut rendered = program.display().to_string();
    for arg in args {
        rendered.push(' ');
        rendered.push_str(&arg.to_string_lossy());
    }
    rendered
}

/// Run `program` with `args`, failing unless it exits 0.
pub async fn run<I, S>(program: &Path, args: I) -> Result<CommandOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<OsString> = args
        .into_iter()
        .map(|arg| arg.as_ref().to_os_string())
        .collect();
    let command = render(program, &args);
    debug!(command = %command, "running host tool");

    let out = Command::new(program)
        .args(&args)
        .output()
        .await
        .map_err(|source| HostError::Spawn {
            program: program.display().to_string(),
            source,
        })?;

    let output = CommandOutput {
        exit_code: out.status.code().unwrap_or(-1),
        stdout: truncate_output(
            String::from_utf8_lossy(&out.stdout).into_owned(),
            MAX_OUTPUT_SIZE,
        ),
        stderr: truncate_output(
            String::from_utf8_lossy(&out.stderr).into_owned(),
            MAX_OUTPUT_SIZE,
        ),
    };
    debug!(
        command = %command,
        exit_code = output.exit_code,
        stdout_len = output.stdout.len(),
        stderr_len = output.stderr.len(),
        "host tool finished"
    );
    trace!(stdout = %output.stdout, stderr = %output.stderr, "host tool output");

    if !output.success() {
        return Err(HostError::ToolFailed {
            command,
            exit_code: output.exit_code,
            stderr: output.diagnostics().to_string(),
        });
    }
    Ok(output)
}
