//! In-memory transport for tests (feature: `test-util`).
//!
//! `MockConnector` hands out sessions that emulate a tiny remote host:
//! `echo`, `true` and `false` work out of the box, other commands can be
//! scripted with [`MockConnector::respond`], transfers go to an in-memory
//! file map, and shells echo input back like a terminal.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    path::Path,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;

use crate::{ConnectionConfig, Connector, ExecOutput, RemoteSession, ShellChannel, TransportError};

/// Shell command that streams output forever.
pub const ENDLESS_COMMAND: &str = "yes";

#[derive(Default)]
struct MockState {
    refused_hosts: HashSet<String>,
    broken_transfer_hosts: HashSet<String>,
    dead_hosts: HashSet<String>,
    responses: HashMap<String, ExecOutput>,
    remote_files: HashMap<String, Vec<u8>>,
    exec_delay: Option<Duration>,
    executed: Vec<String>,
    connects: usize,
    closes: usize,
    shells_opened: usize,
    shells_closed: usize,
}

/// Scriptable in-memory [`Connector`].
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the handshake for `host`.
    #[must_use]
    pub fn refuse_host(self, host: &str) -> Self {
        self.state().refused_hosts.insert(host.to_string());
        self
    }

    /// Complete the handshake for `host` but fail opening the transfer channel.
    #[must_use]
    pub fn break_transfer_channel(self, host: &str) -> Self {
        self.state().broken_transfer_hosts.insert(host.to_string());
        self
    }

    /// Script the output of an exact command line.
    #[must_use]
    pub fn respond(self, command: &str, output: ExecOutput) -> Self {
        self.state().responses.insert(command.to_string(), output);
        self
    }

    /// Seed a file on the emulated remote host.
    #[must_use]
    pub fn with_remote_file(self, path: &str, contents: &[u8]) -> Self {
        self.state()
            .remote_files
            .insert(path.to_string(), contents.to_vec());
        self
    }

    /// Make every command take this long.
    #[must_use]
    pub fn with_exec_delay(self, delay: Duration) -> Self {
        self.state().exec_delay = Some(delay);
        self
    }

    /// Drop every live transport to `host`; later I/O fails with `Closed`.
    pub fn kill(&self, host: &str) {
        self.state().dead_hosts.insert(host.to_string());
    }

    /// Undo [`MockConnector::kill`].
    pub fn revive(&self, host: &str) {
        self.state().dead_hosts.remove(host);
    }

    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.state().connects
    }

    #[must_use]
    pub fn close_count(&self) -> usize {
        self.state().closes
    }

    #[must_use]
    pub fn shells_opened(&self) -> usize {
        self.state().shells_opened
    }

    #[must_use]
    pub fn shells_closed(&self) -> usize {
        self.state().shells_closed
    }

    /// Every command line run so far, in order.
    #[must_use]
    pub fn executed(&self) -> Vec<String> {
        self.state().executed.clone()
    }

    /// Contents of an emulated remote file.
    #[must_use]
    pub fn remote_file(&self, path: &str) -> Option<Vec<u8>> {
        self.state().remote_files.get(path).cloned()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn RemoteSession>, TransportError> {
        let mut state = self.state();
        if state.refused_hosts.contains(&config.host) {
            return Err(TransportError::Connect(format!(
                "{}: connection refused",
                config.endpoint()
            )));
        }
        if state.broken_transfer_hosts.contains(&config.host) {
            state.closes += 1;
            return Err(TransportError::Sftp("subsystem request failed".into()));
        }
        state.connects += 1;
        drop(state);

        Ok(Box::new(MockSession {
            host: config.host.clone(),
            connector: self.clone(),
            closed: false,
        }))
    }
}

struct MockSession {
    host: String,
    connector: MockConnector,
    closed: bool,
}

impl MockSession {
    fn ensure_alive(&self) -> Result<(), TransportError> {
        if self.connector.state().dead_hosts.contains(&self.host) {
            Err(TransportError::Closed)
        } else if self.closed {
            Err(TransportError::ShellExited)
        } else {
            Ok(())
        }
    }
}

fn emulate(command: &str, responses: &HashMap<String, ExecOutput>) -> ExecOutput {
    if let Some(scripted) = responses.get(command) {
        return scripted.clone();
    }
    let trimmed = command.trim();
    if let Some(text) = trimmed.strip_prefix("echo ") {
        return ExecOutput {
            exit_code: Some(0),
            stdout: format!("{}\n", text.trim_matches('"')).into_bytes(),
            stderr: Vec::new(),
        };
    }
    match trimmed {
        "true" | "" => ExecOutput {
            exit_code: Some(0),
            ..ExecOutput::default()
        },
        "false" => ExecOutput {
            exit_code: Some(1),
            ..ExecOutput::default()
        },
        other => ExecOutput {
            exit_code: Some(127),
            stdout: Vec::new(),
            stderr: format!("sh: {other}: command not found\n").into_bytes(),
        },
    }
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn exec(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecOutput, TransportError> {
        self.ensure_alive()?;
        let delay = self.connector.state().exec_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay.min(timeout)).await;
            if delay > timeout {
                return Err(TransportError::Timeout(timeout.as_secs()));
            }
        }
        let mut state = self.connector.state();
        state.executed.push(command.to_string());
        Ok(emulate(command, &state.responses))
    }

    async fn upload(&mut self, local: &Path, remote: &str) -> Result<u64, TransportError> {
        self.ensure_alive()?;
        let data = tokio::fs::read(local).await?;
        let len = data.len() as u64;
        self.connector
            .state()
            .remote_files
            .insert(remote.to_string(), data);
        Ok(len)
    }

    async fn download(&mut self, remote: &str, local: &Path) -> Result<u64, TransportError> {
        self.ensure_alive()?;
        let data = self
            .connector
            .state()
            .remote_files
            .get(remote)
            .cloned()
            .ok_or_else(|| TransportError::Sftp(format!("{remote}: no such file")))?;
        tokio::fs::write(local, &data).await?;
        Ok(data.len() as u64)
    }

    async fn open_shell(&mut self, _term: &str) -> Result<Box<dyn ShellChannel>, TransportError> {
        self.ensure_alive()?;
        self.connector.state().shells_opened += 1;
        Ok(Box::new(MockShell {
            host: self.host.clone(),
            connector: self.connector.clone(),
            pending: VecDeque::from([b"$ ".to_vec()]),
            endless: false,
            exited: false,
            closed: false,
        }))
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.connector.state().closes += 1;
        }
    }
}

struct MockShell {
    host: String,
    connector: MockConnector,
    pending: VecDeque<Vec<u8>>,
    endless: bool,
    exited: bool,
    closed: bool,
}

impl MockShell {
    fn ensure_alive(&self) -> Result<(), TransportError> {
        if self.connector.state().dead_hosts.contains(&self.host) {
            Err(TransportError::Closed)
        } else if self.closed || self.exited {
            Err(TransportError::ShellExited)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ShellChannel for MockShell {
    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.ensure_alive()?;
        let text = String::from_utf8_lossy(data);
        for line in text.lines() {
            self.pending.push_back(format!("{line}\r\n").into_bytes());
            if line.trim() == ENDLESS_COMMAND {
                self.endless = true;
                continue;
            }
            if line.trim() == "exit" {
                self.exited = true;
                self.pending.clear();
                return Ok(());
            }
            let output = emulate(line, &self.connector.state().responses);
            // Split into small chunks so readers have to loop.
            for chunk in output.stdout.chunks(8).chain(output.stderr.chunks(8)) {
                self.pending.push_back(chunk.to_vec());
            }
            self.pending.push_back(b"$ ".to_vec());
        }
        Ok(())
    }

    async fn read_available(&mut self, wait: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        self.ensure_alive()?;
        if let Some(chunk) = self.pending.pop_front() {
            return Ok(Some(chunk));
        }
        if self.endless {
            return Ok(Some(b"y\n".to_vec()));
        }
        tokio::time::sleep(wait).await;
        Ok(None)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.closed {
            self.closed = true;
            self.connector.state().shells_closed += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_refused_host() {
        let connector = MockConnector::new().refuse_host("10.9.9.9");
        let result = connector
            .connect(&ConnectionConfig::new("10.9.9.9", "ops"))
            .await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
        assert_eq!(connector.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_echo_and_kill() {
        let connector = MockConnector::new();
        let mut session = connector
            .connect(&ConnectionConfig::new("web", "ops"))
            .await
            .unwrap();

        let out = session
            .exec("echo hi", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(out.stdout, b"hi\n");
        assert_eq!(out.exit_code, Some(0));

        connector.kill("web");
        let err = session.exec("true", Duration::from_secs(1)).await;
        assert!(matches!(err, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_shell_echoes_input() {
        let connector = MockConnector::new();
        let mut session = connector
            .connect(&ConnectionConfig::new("web", "ops"))
            .await
            .unwrap();
        let mut shell = session.open_shell("xterm").await.unwrap();
        shell.write(b"echo hello\n").await.unwrap();

        let mut collected = Vec::new();
        while let Some(chunk) = shell
            .read_available(Duration::from_millis(1))
            .await
            .unwrap()
        {
            collected.extend(chunk);
        }
        let text = String::from_utf8(collected).unwrap();
        assert!(text.contains("echo hello\r\n"));
        assert!(text.contains("hello\n"));
    }
}
