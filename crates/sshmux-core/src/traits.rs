//! Core traits for remote transports.

use std::{fmt, path::Path, str::FromStr, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ConnectionConfig, TransportError};

/// Handle to an interactive shell held by a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShellId(Uuid);

impl ShellId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ShellId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ShellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ShellId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Raw result of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit status; `None` if the remote side never reported one.
    pub exit_code: Option<u32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Opens transports to remote endpoints.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Perform the handshake and open both the control channel and the
    /// file-transfer channel.
    ///
    /// Either both channels come up or neither does.
    async fn connect(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn RemoteSession>, TransportError>;
}

/// An established transport to one endpoint.
///
/// Callers serialize access; implementations may assume `&mut self`
/// exclusivity for the duration of each call.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Run a command on the control channel and wait for it to finish.
    async fn exec(&mut self, command: &str, timeout: Duration)
    -> Result<ExecOutput, TransportError>;

    /// Copy a local file to the remote path. Returns bytes written.
    async fn upload(&mut self, local: &Path, remote: &str) -> Result<u64, TransportError>;

    /// Copy a remote file to the local path. Returns bytes written.
    async fn download(&mut self, remote: &str, local: &Path) -> Result<u64, TransportError>;

    /// Open a persistent interactive shell with a pseudo-terminal.
    async fn open_shell(&mut self, term: &str) -> Result<Box<dyn ShellChannel>, TransportError>;

    /// Close both channels. Must not fail.
    async fn close(&mut self);
}

/// A persistent bidirectional shell stream.
#[async_trait]
pub trait ShellChannel: Send + Sync {
    /// Write raw bytes to the shell's input.
    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Wait up to `wait` for output.
    ///
    /// Returns `Ok(None)` if nothing arrived in time,
    /// `Err(TransportError::ShellExited)` once this shell has ended and
    /// `Err(TransportError::Closed)` if the whole session is gone.
    async fn read_available(&mut self, wait: Duration) -> Result<Option<Vec<u8>>, TransportError>;

    /// Close the channel. Closing twice is not an error.
    async fn close(&mut self) -> Result<(), TransportError>;
}
