//! Structured results returned across the core boundary.
//!
//! Every operation reports success or failure as data. Each type
//! serializes to a JSON map with a `success` discriminant, plus `error`
//! and `kind` on failure.

use serde::{Deserialize, Serialize};

use crate::{DirEntry, ShellId};

/// Error text used whenever a connection name does not resolve.
pub const CONNECTION_NOT_FOUND: &str = "connection not found";

/// Failure category carried by every failed outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Handshake, authentication or transport failure.
    Connectivity,
    /// Unknown connection, session or shell.
    NotFound,
    /// Nonzero exit or error while running a command.
    Execution,
    /// Upload, download or listing failure.
    Transfer,
    /// Interactive shell failure.
    Shell,
    /// A configured cap was reached.
    Limit,
    /// Malformed request.
    Invalid,
}

/// Result of running one command on the control channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub success: bool,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<FailureKind>,
}

impl CommandOutcome {
    /// The command ran to completion; success means exit status zero.
    #[must_use]
    pub fn completed(
        command: impl Into<String>,
        exit_code: u32,
        stdout: String,
        stderr: String,
    ) -> Self {
        let success = exit_code == 0;
        Self {
            success,
            command: command.into(),
            exit_code: Some(exit_code),
            stdout: Some(stdout),
            stderr: Some(stderr),
            error: None,
            kind: (!success).then_some(FailureKind::Execution),
        }
    }

    /// The command could not be run or did not finish.
    #[must_use]
    pub fn failed(command: impl Into<String>, kind: FailureKind, error: impl Into<String>) -> Self {
        Self {
            success: false,
            command: command.into(),
            exit_code: None,
            stdout: None,
            stderr: None,
            error: Some(error.into()),
            kind: Some(kind),
        }
    }

    /// The named connection does not exist.
    #[must_use]
    pub fn not_found(command: impl Into<String>) -> Self {
        Self::failed(command, FailureKind::NotFound, CONNECTION_NOT_FOUND)
    }

    /// Human-readable rendering for a conversation log.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.success {
            let mut text = self.stdout.clone().unwrap_or_default();
            if let Some(stderr) = self.stderr.as_deref().filter(|s| !s.is_empty()) {
                text.push_str("\nstderr:\n");
                text.push_str(stderr);
            }
            return text;
        }
        match (&self.error, self.exit_code) {
            (Some(error), _) => format!("command failed: {error}"),
            (None, Some(code)) => {
                let stderr = self.stderr.as_deref().unwrap_or_default();
                format!("command exited with status {code}\n{stderr}")
            }
            (None, None) => "command failed".to_string(),
        }
    }
}

/// Direction of a file transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    Upload,
    Download,
}

/// Result of an upload or download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOutcome {
    pub success: bool,
    pub direction: TransferDirection,
    pub local_path: String,
    pub remote_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<FailureKind>,
}

impl TransferOutcome {
    #[must_use]
    pub fn transferred(
        direction: TransferDirection,
        local_path: impl Into<String>,
        remote_path: impl Into<String>,
        bytes: u64,
    ) -> Self {
        Self {
            success: true,
            direction,
            local_path: local_path.into(),
            remote_path: remote_path.into(),
            bytes: Some(bytes),
            error: None,
            kind: None,
        }
    }

    #[must_use]
    pub fn failed(
        direction: TransferDirection,
        local_path: impl Into<String>,
        remote_path: impl Into<String>,
        kind: FailureKind,
        error: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            direction,
            local_path: local_path.into(),
            remote_path: remote_path.into(),
            bytes: None,
            error: Some(error.into()),
            kind: Some(kind),
        }
    }

    #[must_use]
    pub fn not_found(
        direction: TransferDirection,
        local_path: impl Into<String>,
        remote_path: impl Into<String>,
    ) -> Self {
        Self::failed(
            direction,
            local_path,
            remote_path,
            FailureKind::NotFound,
            CONNECTION_NOT_FOUND,
        )
    }
}

/// Result of listing a remote directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingOutcome {
    pub success: bool,
    pub path: String,
    #[serde(default)]
    pub files: Vec<DirEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<FailureKind>,
}

impl ListingOutcome {
    #[must_use]
    pub fn listed(path: impl Into<String>, files: Vec<DirEntry>) -> Self {
        Self {
            success: true,
            path: path.into(),
            files,
            error: None,
            kind: None,
        }
    }

    #[must_use]
    pub fn failed(path: impl Into<String>, kind: FailureKind, error: impl Into<String>) -> Self {
        Self {
            success: false,
            path: path.into(),
            files: Vec::new(),
            error: Some(error.into()),
            kind: Some(kind),
        }
    }

    #[must_use]
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::failed(path, FailureKind::NotFound, CONNECTION_NOT_FOUND)
    }
}

/// Result of opening an interactive shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellOpened {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<ShellId>,
    pub term: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<FailureKind>,
}

impl ShellOpened {
    #[must_use]
    pub fn opened(
        shell: ShellId,
        term: impl Into<String>,
        host: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            success: true,
            shell: Some(shell),
            term: term.into(),
            host: Some(host.into()),
            username: Some(username.into()),
            error: None,
            kind: None,
        }
    }

    #[must_use]
    pub fn failed(term: impl Into<String>, kind: FailureKind, error: impl Into<String>) -> Self {
        Self {
            success: false,
            shell: None,
            term: term.into(),
            host: None,
            username: None,
            error: Some(error.into()),
            kind: Some(kind),
        }
    }

    #[must_use]
    pub fn not_found(term: impl Into<String>) -> Self {
        Self::failed(term, FailureKind::NotFound, CONNECTION_NOT_FOUND)
    }
}

/// Output collected after writing a line to an interactive shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellOutput {
    pub success: bool,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Reading stopped on a time or size bound rather than on idleness.
    #[serde(default)]
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<FailureKind>,
}

impl ShellOutput {
    #[must_use]
    pub fn collected(command: impl Into<String>, output: String, truncated: bool) -> Self {
        Self {
            success: true,
            command: command.into(),
            output: Some(output),
            truncated,
            error: None,
            kind: None,
        }
    }

    #[must_use]
    pub fn failed(command: impl Into<String>, kind: FailureKind, error: impl Into<String>) -> Self {
        Self {
            success: false,
            command: command.into(),
            output: None,
            truncated: false,
            error: Some(error.into()),
            kind: Some(kind),
        }
    }

    #[must_use]
    pub fn not_found(command: impl Into<String>) -> Self {
        Self::failed(command, FailureKind::NotFound, CONNECTION_NOT_FOUND)
    }

    /// Human-readable rendering for a conversation log.
    #[must_use]
    pub fn summary(&self) -> String {
        match (&self.output, &self.error) {
            (Some(output), _) if self.truncated => format!("{output}\n[output truncated]"),
            (Some(output), _) => output.clone(),
            (None, Some(error)) => format!("shell command failed: {error}"),
            (None, None) => String::new(),
        }
    }
}

/// Bare success/failure acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<FailureKind>,
}

impl Ack {
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            success: true,
            error: None,
            kind: None,
        }
    }

    #[must_use]
    pub fn failed(kind: FailureKind, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            kind: Some(kind),
        }
    }

    #[must_use]
    pub fn not_found() -> Self {
        Self::failed(FailureKind::NotFound, CONNECTION_NOT_FOUND)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_not_found_shape() {
        let value = serde_json::to_value(CommandOutcome::not_found("echo hi")).unwrap();
        assert_eq!(
            value,
            json!({
                "success": false,
                "command": "echo hi",
                "error": "connection not found",
                "kind": "not_found",
            })
        );
    }

    #[test]
    fn test_nonzero_exit_keeps_output() {
        let outcome = CommandOutcome::completed("false", 1, String::new(), "boom\n".into());
        assert!(!outcome.success);
        assert_eq!(outcome.kind, Some(FailureKind::Execution));
        assert_eq!(outcome.stderr.as_deref(), Some("boom\n"));
        assert!(outcome.summary().contains("status 1"));
    }

    #[test]
    fn test_summary_includes_stderr_on_success() {
        let outcome = CommandOutcome::completed("make", 0, "ok\n".into(), "warning\n".into());
        assert_eq!(outcome.summary(), "ok\n\nstderr:\nwarning\n");
    }

    #[test]
    fn test_shell_summary_marks_truncation() {
        let full = ShellOutput::collected("ls", "a b".into(), false);
        let cut = ShellOutput::collected("yes", "y\ny".into(), true);
        let failed = ShellOutput::failed("ls", FailureKind::Shell, "channel closed");

        assert_eq!(full.summary(), "a b");
        assert!(cut.summary().ends_with("[output truncated]"));
        assert_eq!(failed.summary(), "shell command failed: channel closed");
    }

    #[test]
    fn test_transfer_echoes_paths() {
        let value = serde_json::to_value(TransferOutcome::not_found(
            TransferDirection::Upload,
            "/tmp/a",
            "/srv/a",
        ))
        .unwrap();
        assert_eq!(value["direction"], "upload");
        assert_eq!(value["local_path"], "/tmp/a");
        assert_eq!(value["remote_path"], "/srv/a");
        assert_eq!(value["success"], false);
    }
}
