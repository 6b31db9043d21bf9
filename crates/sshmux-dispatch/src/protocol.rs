//! Tool-call protocol.
//!
//! A call is a tool name plus an argument map. Both are folded into one
//! adjacently tagged enum so argument validation is plain deserialization.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sshmux_core::FailureKind;
use sshmux_session::{SessionId, SessionSnapshot};
use thiserror::Error;

/// Every tool name accepted by [`ToolCall::parse`].
pub const TOOL_NAMES: &[&str] = &[
    "ssh_connect",
    "ssh_disconnect",
    "ssh_list_connections",
    "ssh_execute",
    "ssh_upload",
    "ssh_download",
    "ssh_list",
    "ssh_shell",
    "shell_send",
    "shell_close",
    "session_create",
    "session_list",
    "session_delete",
    "session_execute",
    "session_history",
    "session_context",
    "session_export",
    "session_import",
    "session_cleanup",
];

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Invalid arguments for {tool}: {source}")]
    InvalidArguments {
        tool: String,
        #[source]
        source: serde_json::Error,
    },
}

impl DispatchError {
    /// Always `invalid`: the call never reached a registry.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        FailureKind::Invalid
    }
}

fn default_list_path() -> String {
    ".".to_string()
}

fn default_term() -> String {
    "xterm".to_string()
}

const fn default_history_count() -> usize {
    20
}

/// Snapshot given either as JSON text or as an object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SnapshotInput {
    Text(String),
    Snapshot(Box<SessionSnapshot>),
}

/// A validated tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tool", content = "arguments", rename_all = "snake_case")]
pub enum ToolCall {
    /// Open and register a connection. Without `host`, the named preset
    /// from settings is used.
    SshConnect {
        name: String,
        host: Option<String>,
        username: Option<String>,
        port: Option<u16>,
        password: Option<String>,
        key_filename: Option<String>,
        passphrase: Option<String>,
        timeout: Option<u64>,
    },
    SshDisconnect {
        name: String,
    },
    SshListConnections {},
    SshExecute {
        connection: String,
        command: String,
        timeout: Option<u64>,
    },
    SshUpload {
        connection: String,
        local_path: String,
        remote_path: String,
    },
    SshDownload {
        connection: String,
        remote_path: String,
        local_path: String,
    },
    SshList {
        connection: String,
        #[serde(default = "default_list_path")]
        path: String,
    },
    SshShell {
        connection: Option<String>,
        session_id: Option<SessionId>,
        #[serde(default = "default_term")]
        term: String,
    },
    ShellSend {
        session_id: SessionId,
        command: String,
    },
    ShellClose {
        session_id: SessionId,
    },
    SessionCreate {
        name: String,
        connection: String,
    },
    SessionList {},
    SessionDelete {
        session_id: SessionId,
    },
    SessionExecute {
        session_id: SessionId,
        command: String,
        timeout: Option<u64>,
    },
    SessionHistory {
        session_id: SessionId,
        #[serde(default = "default_history_count")]
        count: usize,
    },
    SessionContext {
        session_id: SessionId,
    },
    SessionExport {
        session_id: SessionId,
    },
    SessionImport {
        snapshot: SnapshotInput,
    },
    SessionCleanup {
        max_inactive_hours: Option<u64>,
    },
}

impl ToolCall {
    /// Build a call from a tool name and its argument map.
    ///
    /// A `null` argument value is treated as an empty map.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::UnknownTool` for names outside
    /// [`TOOL_NAMES`] and `DispatchError::InvalidArguments` when the
    /// arguments do not fit the tool.
    pub fn parse(name: &str, arguments: Value) -> Result<Self, DispatchError> {
        if !TOOL_NAMES.contains(&name) {
            return Err(DispatchError::UnknownTool(name.to_string()));
        }
        let arguments = if arguments.is_null() {
            json!({})
        } else {
            arguments
        };
        serde_json::from_value(json!({ "tool": name, "arguments": arguments })).map_err(|source| {
            DispatchError::InvalidArguments {
                tool: name.to_string(),
                source,
            }
        })
    }

    /// Tool name this call was parsed from.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SshConnect { .. } => "ssh_connect",
            Self::SshDisconnect { .. } => "ssh_disconnect",
            Self::SshListConnections {} => "ssh_list_connections",
            Self::SshExecute { .. } => "ssh_execute",
            Self::SshUpload { .. } => "ssh_upload",
            Self::SshDownload { .. } => "ssh_download",
            Self::SshList { .. } => "ssh_list",
            Self::SshShell { .. } => "ssh_shell",
            Self::ShellSend { .. } => "shell_send",
            Self::ShellClose { .. } => "shell_close",
            Self::SessionCreate { .. } => "session_create",
            Self::SessionList {} => "session_list",
            Self::SessionDelete { .. } => "session_delete",
            Self::SessionExecute { .. } => "session_execute",
            Self::SessionHistory { .. } => "session_history",
            Self::SessionContext { .. } => "session_context",
            Self::SessionExport { .. } => "session_export",
            Self::SessionImport { .. } => "session_import",
            Self::SessionCleanup { .. } => "session_cleanup",
        }
    }
}
