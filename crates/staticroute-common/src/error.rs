//! Error types for shell execution.
//!
//! All errors implement `std::error::Error` via `thiserror`.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for shell operations.
pub type ShellResult<T> = Result<T, ShellError>;

/// Errors that can occur while running a host command.
#[derive(Debug, Error)]
pub enum ShellError {
    /// Failed to spawn the command.
    #[error("Failed to execute shell command '{command}': {source}")]
    Spawn {
        /// The command that failed to execute.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Command returned a non-zero exit code.
    #[error("Shell command failed: '{command}' (exit code {exit_code}): {output}")]
    CommandFailed {
        /// The command that failed.
        command: String,
        /// The exit code.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// Command did not finish within its deadline and was killed.
    #[error("Shell command timed out after {}ms: '{command}'", timeout.as_millis())]
    Timeout {
        /// The command that timed out.
        command: String,
        /// The deadline that elapsed.
        timeout: Duration,
    },
}

impl ShellError {
    /// Creates a timeout error.
    pub fn timeout(command: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            command: command.into(),
            timeout,
        }
    }

    /// Returns the command output for failed commands, empty otherwise.
    pub fn output(&self) -> &str {
        match self {
            ShellError::CommandFailed { output, .. } => output,
            _ => "",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failed_display() {
        let err = ShellError::CommandFailed {
            command: "ip route add 10.0.0.0/24 via 10.0.2.1".to_string(),
            exit_code: 2,
            output: "RTNETLINK answers: File exists".to_string(),
        };
        assert!(err.to_string().contains("ip route add"));
        assert!(err.to_string().contains("exit code 2"));
        assert_eq!(err.output(), "RTNETLINK answers: File exists");
    }

    #[test]
    fn test_timeout_display() {
        let err = ShellError::timeout("sleep 10", Duration::from_millis(250));
        assert_eq!(
            err.to_string(),
            "Shell command timed out after 250ms: 'sleep 10'"
        );
        assert_eq!(err.output(), "");
    }
}
