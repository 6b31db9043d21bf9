//! A single named connection.
//!
//! All remote I/O on a connection goes through one async mutex, so two
//! commands never interleave on the same transport. Status is kept behind
//! a separate lock so listing connections never waits on a slow command.

use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sshmux_core::{
    Ack, CommandOutcome, ConnectionConfig, Connector, ExecOutput, FailureKind, ListingOutcome,
    RemoteSession, ShellChannel, ShellId, ShellOpened, ShellOutput, ShellReadLimits,
    TransferDirection, TransferOutcome, TransportError, listing,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::shell::read_bounded;

const NOT_CONNECTED: &str = "connection is not established";
const SHELL_NOT_FOUND: &str = "shell not found";

/// Public view of a connection's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub is_connected: bool,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct Status {
    connected: bool,
    last_activity: DateTime<Utc>,
}

#[derive(Default)]
struct Io {
    transport: Option<Box<dyn RemoteSession>>,
    shells: HashMap<ShellId, Box<dyn ShellChannel>>,
}

/// One endpoint, its transport, and the shells opened on it.
pub struct Connection {
    name: String,
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    io: Mutex<Io>,
    status: RwLock<Status>,
}

impl Connection {
    /// Unconnected handle; call [`Connection::connect`] before use.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        config: ConnectionConfig,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            connector,
            io: Mutex::new(Io::default()),
            status: RwLock::new(Status {
                connected: false,
                last_activity: Utc::now(),
            }),
        }
    }

    /// Registry name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Endpoint and credential this connection was created with.
    #[must_use]
    pub const fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Last known transport status. Cleared by failed keep-alive probes.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .connected
    }

    /// Time of the last operation or successful probe.
    #[must_use]
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .last_activity
    }

    /// Serializable status snapshot.
    #[must_use]
    pub fn info(&self) -> ConnectionInfo {
        let status = *self.status.read().unwrap_or_else(PoisonError::into_inner);
        ConnectionInfo {
            host: self.config.host.clone(),
            port: self.config.port,
            username: self.config.username.clone(),
            is_connected: status.connected,
            last_activity: status.last_activity,
        }
    }

    fn set_connected(&self, connected: bool) {
        self.status
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .connected = connected;
    }

    fn touch(&self) {
        self.status
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .last_activity = Utc::now();
    }

    /// Mark the connection down if the transport reports it is gone.
    fn note_error(&self, error: &TransportError) {
        if matches!(error, TransportError::Closed) {
            warn!(connection = %self.name, "Transport closed by remote");
            self.set_connected(false);
        }
    }

    /// Establish the transport. Returns immediately if already connected.
    ///
    /// Both the control and transfer channels must come up; on any failure
    /// nothing is left open.
    ///
    /// # Errors
    ///
    /// Returns the transport error from the handshake or a timeout.
    pub async fn connect(&self) -> Result<(), TransportError> {
        let mut io = self.io.lock().await;
        if io.transport.is_some() && self.is_connected() {
            return Ok(());
        }
        if let Some(mut stale) = io.transport.take() {
            debug!(connection = %self.name, "Dropping stale transport");
            stale.close().await;
        }

        let timeout = self.config.timeout();
        let result = tokio::time::timeout(timeout, self.connector.connect(&self.config))
            .await
            .unwrap_or(Err(TransportError::Timeout(timeout.as_secs())));

        match result {
            Ok(transport) => {
                io.transport = Some(transport);
                self.set_connected(true);
                self.touch();
                info!(
                    connection = %self.name,
                    endpoint = %self.config.endpoint(),
                    "Connected"
                );
                Ok(())
            }
            Err(e) => {
                self.set_connected(false);
                warn!(
                    connection = %self.name,
                    endpoint = %self.config.endpoint(),
                    error = %e,
                    "Connect failed"
                );
                Err(e)
            }
        }
    }

    /// Close every shell and the transport. Idempotent and never fails.
    pub async fn disconnect(&self) {
        let mut io = self.io.lock().await;
        for (id, mut shell) in io.shells.drain() {
            if let Err(e) = shell.close().await {
                debug!(connection = %self.name, shell = %id, error = %e, "Shell close failed");
            }
        }
        if let Some(mut transport) = io.transport.take() {
            transport.close().await;
            info!(connection = %self.name, "Disconnected");
        }
        self.set_connected(false);
    }

    /// Run a command and capture its output.
    ///
    /// A nonzero exit is reported as a failed outcome with both streams
    /// intact. Output is decoded as UTF-8 with invalid bytes replaced.
    pub async fn execute_command(&self, command: &str, timeout: Duration) -> CommandOutcome {
        let mut io = self.io.lock().await;
        let Some(transport) = self.live(&mut io) else {
            return CommandOutcome::failed(command, FailureKind::Connectivity, NOT_CONNECTED);
        };
        self.touch();
        debug!(connection = %self.name, command, "Executing");

        match run(transport.as_mut(), command, timeout).await {
            Ok(ExecOutput {
                exit_code: Some(code),
                stdout,
                stderr,
            }) => CommandOutcome::completed(command, code, lossy(stdout), lossy(stderr)),
            Ok(ExecOutput {
                exit_code: None, ..
            }) => CommandOutcome::failed(
                command,
                FailureKind::Execution,
                "remote did not report an exit status",
            ),
            Err(e) => {
                self.note_error(&e);
                CommandOutcome::failed(command, FailureKind::Execution, e.to_string())
            }
        }
    }

    /// Copy a local file to the remote host.
    pub async fn upload_file(&self, local_path: &Path, remote_path: &str) -> TransferOutcome {
        let local = local_path.display().to_string();
        let mut io = self.io.lock().await;
        let Some(transport) = self.live(&mut io) else {
            return TransferOutcome::failed(
                TransferDirection::Upload,
                local,
                remote_path,
                FailureKind::Connectivity,
                NOT_CONNECTED,
            );
        };
        self.touch();

        match transport.upload(local_path, remote_path).await {
            Ok(bytes) => {
                info!(connection = %self.name, local = %local, remote = remote_path, bytes, "Uploaded");
                TransferOutcome::transferred(TransferDirection::Upload, local, remote_path, bytes)
            }
            Err(e) => {
                self.note_error(&e);
                TransferOutcome::failed(
                    TransferDirection::Upload,
                    local,
                    remote_path,
                    FailureKind::Transfer,
                    e.to_string(),
                )
            }
        }
    }

    /// Copy a remote file to the local filesystem.
    pub async fn download_file(&self, remote_path: &str, local_path: &Path) -> TransferOutcome {
        let local = local_path.display().to_string();
        let mut io = self.io.lock().await;
        let Some(transport) = self.live(&mut io) else {
            return TransferOutcome::failed(
                TransferDirection::Download,
                local,
                remote_path,
                FailureKind::Connectivity,
                NOT_CONNECTED,
            );
        };
        self.touch();

        match transport.download(remote_path, local_path).await {
            Ok(bytes) => {
                info!(connection = %self.name, remote = remote_path, local = %local, bytes, "Downloaded");
                TransferOutcome::transferred(TransferDirection::Download, local, remote_path, bytes)
            }
            Err(e) => {
                self.note_error(&e);
                TransferOutcome::failed(
                    TransferDirection::Download,
                    local,
                    remote_path,
                    FailureKind::Transfer,
                    e.to_string(),
                )
            }
        }
    }

    /// List a remote directory by running `ls -la` and parsing the output.
    pub async fn list_directory(&self, path: &str, timeout: Duration) -> ListingOutcome {
        let command = listing::listing_command(path);
        let mut io = self.io.lock().await;
        let Some(transport) = self.live(&mut io) else {
            return ListingOutcome::failed(path, FailureKind::Connectivity, NOT_CONNECTED);
        };
        self.touch();

        match run(transport.as_mut(), &command, timeout).await {
            Ok(ExecOutput {
                exit_code: Some(0),
                stdout,
                ..
            }) => ListingOutcome::listed(path, listing::parse_listing(&lossy(stdout))),
            Ok(output) => {
                let stderr = lossy(output.stderr);
                let error = match (stderr.trim(), output.exit_code) {
                    ("", Some(code)) => format!("ls exited with status {code}"),
                    ("", None) => "ls did not report an exit status".to_string(),
                    (text, _) => text.to_string(),
                };
                ListingOutcome::failed(path, FailureKind::Transfer, error)
            }
            Err(e) => {
                self.note_error(&e);
                ListingOutcome::failed(path, FailureKind::Transfer, e.to_string())
            }
        }
    }

    /// Probe the transport with a no-op command.
    ///
    /// A connection busy with another operation is alive by definition and
    /// is not probed. A failed probe marks the connection disconnected; it
    /// is not reconnected or removed.
    pub async fn keep_alive(&self, timeout: Duration) -> bool {
        if !self.is_connected() {
            return false;
        }
        let Ok(mut io) = self.io.try_lock() else {
            debug!(connection = %self.name, "Busy, skipping keep-alive probe");
            return true;
        };
        let Some(transport) = self.live(&mut io) else {
            return false;
        };

        match run(transport.as_mut(), "true", timeout).await {
            Ok(ExecOutput {
                exit_code: Some(0), ..
            }) => {
                self.touch();
                true
            }
            Ok(output) => {
                warn!(connection = %self.name, exit_code = ?output.exit_code, "Keep-alive probe failed");
                self.set_connected(false);
                false
            }
            Err(e) => {
                warn!(connection = %self.name, error = %e, "Keep-alive probe failed");
                self.set_connected(false);
                false
            }
        }
    }

    /// Open an interactive shell with a pseudo-terminal.
    pub async fn create_shell(&self, term: &str) -> ShellOpened {
        let mut io = self.io.lock().await;
        let Some(transport) = self.live(&mut io) else {
            return ShellOpened::failed(term, FailureKind::Connectivity, NOT_CONNECTED);
        };
        self.touch();

        match transport.open_shell(term).await {
            Ok(shell) => {
                let id = ShellId::new();
                io.shells.insert(id, shell);
                info!(connection = %self.name, shell = %id, term, "Shell opened");
                ShellOpened::opened(id, term, &self.config.host, &self.config.username)
            }
            Err(e) => {
                self.note_error(&e);
                ShellOpened::failed(term, FailureKind::Shell, e.to_string())
            }
        }
    }

    /// Write one line to a shell and collect what it prints.
    ///
    /// Reading is bounded by `limits`; `truncated` is set when a time or
    /// size bound ended it. A shell whose channel fails is discarded.
    pub async fn send_shell_command(
        &self,
        shell_id: ShellId,
        command: &str,
        limits: &ShellReadLimits,
    ) -> ShellOutput {
        let mut io = self.io.lock().await;
        if self.live(&mut io).is_none() {
            return ShellOutput::failed(command, FailureKind::Connectivity, NOT_CONNECTED);
        }
        let Some(shell) = io.shells.get_mut(&shell_id) else {
            return ShellOutput::failed(command, FailureKind::NotFound, SHELL_NOT_FOUND);
        };
        self.touch();

        let line = format!("{command}\n");
        let result = match shell.write(line.as_bytes()).await {
            Ok(()) => read_bounded(shell.as_mut(), limits).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(collected) => {
                debug!(
                    connection = %self.name,
                    shell = %shell_id,
                    bytes = collected.bytes.len(),
                    truncated = collected.truncated,
                    "Shell output collected"
                );
                ShellOutput::collected(command, lossy(collected.bytes), collected.truncated)
            }
            Err(e) => {
                warn!(connection = %self.name, shell = %shell_id, error = %e, "Shell failed, discarding");
                if let Some(mut dead) = io.shells.remove(&shell_id) {
                    let _ = dead.close().await;
                }
                self.note_error(&e);
                ShellOutput::failed(command, FailureKind::Shell, e.to_string())
            }
        }
    }

    /// Close and forget a shell.
    ///
    /// Closing an unknown or already closed shell succeeds.
    pub async fn close_shell(&self, shell_id: ShellId) -> Ack {
        let mut io = self.io.lock().await;
        let Some(mut shell) = io.shells.remove(&shell_id) else {
            debug!(connection = %self.name, shell = %shell_id, "Shell already closed");
            return Ack::ok();
        };
        match shell.close().await {
            Ok(()) => {
                info!(connection = %self.name, shell = %shell_id, "Shell closed");
                Ack::ok()
            }
            Err(e) => Ack::failed(FailureKind::Shell, e.to_string()),
        }
    }

    /// Whether a shell handle is open on this connection.
    pub async fn has_shell(&self, shell_id: ShellId) -> bool {
        self.io.lock().await.shells.contains_key(&shell_id)
    }

    fn live<'a>(&self, io: &'a mut Io) -> Option<&'a mut Box<dyn RemoteSession>> {
        io.transport.as_mut().filter(|_| self.is_connected())
    }
}

async fn run(
    transport: &mut dyn RemoteSession,
    command: &str,
    timeout: Duration,
) -> Result<ExecOutput, TransportError> {
    tokio::time::timeout(timeout, transport.exec(command, timeout))
        .await
        .unwrap_or(Err(TransportError::Timeout(timeout.as_secs())))
}

fn lossy(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes)
        .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}
