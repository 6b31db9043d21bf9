//! Error types shared across the workspace.

use std::path::PathBuf;

use thiserror::Error;

/// Failure reported by a transport implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connect failed: {0}")]
    Connect(String),
    #[error("Authentication failed for {0}")]
    Auth(String),
    #[error("Channel error: {0}")]
    Channel(String),
    #[error("File transfer error: {0}")]
    Sftp(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Timed out after {0}s")]
    Timeout(u64),
    /// The session itself is gone; the connection must be re-established.
    #[error("Transport closed")]
    Closed,
    /// One shell ended; the session that carried it may still be alive.
    #[error("Shell exited")]
    ShellExited,
}

/// Settings could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}
