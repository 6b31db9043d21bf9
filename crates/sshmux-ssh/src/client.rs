//! SSH client: handshake, authentication, exec and SFTP transfers.

use std::{fmt::Display, path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use russh::{
    ChannelMsg, Disconnect, client,
    keys::{PrivateKey, PrivateKeyWithHashAlg, PublicKey, load_secret_key},
};
use russh_sftp::client::SftpSession;
use sshmux_core::{
    ConnectionConfig, Connector, Credential, ExecOutput, RemoteSession, ShellChannel,
    TransportError,
};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::shell::RusshShell;

/// Default PTY size for interactive shells.
const SHELL_COLS: u32 = 200;
const SHELL_ROWS: u32 = 50;

fn channel_err(e: impl Display) -> TransportError {
    TransportError::Channel(e.to_string())
}

/// Map a russh error on an established session. Errors meaning the
/// session is gone become `Closed` so the connection is marked down.
pub(crate) fn session_err(e: russh::Error) -> TransportError {
    if matches!(
        e,
        russh::Error::Disconnect | russh::Error::HUP | russh::Error::SendError
    ) {
        TransportError::Closed
    } else {
        channel_err(e)
    }
}

fn sftp_err(e: impl Display) -> TransportError {
    TransportError::Sftp(e.to_string())
}

/// Client handler. Accepts any host key, like an auto-add policy.
pub struct ClientHandler {
    endpoint: String,
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!(
            endpoint = %self.endpoint,
            algorithm = %server_public_key.algorithm(),
            "Accepting server host key"
        );
        Ok(true)
    }
}

/// Opens russh sessions with an SFTP subsystem alongside.
#[derive(Clone)]
pub struct RusshConnector {
    config: Arc<client::Config>,
}

impl Default for RusshConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl RusshConnector {
    /// Create a connector with russh's default client configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_client_config(client::Config::default())
    }

    /// Create a connector with a custom russh client configuration.
    #[must_use]
    pub fn with_client_config(config: client::Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    async fn handshake(
        &self,
        config: &ConnectionConfig,
    ) -> Result<client::Handle<ClientHandler>, TransportError> {
        let handler = ClientHandler {
            endpoint: config.endpoint(),
        };
        let mut handle = client::connect(
            Arc::clone(&self.config),
            (config.host.as_str(), config.port),
            handler,
        )
        .await
        .map_err(|e| TransportError::Connect(format!("{}: {e}", config.endpoint())))?;

        let auth = match config.credential() {
            Credential::Password(password) => {
                handle
                    .authenticate_password(config.username.as_str(), password)
                    .await
            }
            Credential::KeyFile { path, passphrase } => {
                let key = load_key(path, passphrase)?;
                let hash_alg = handle
                    .best_supported_rsa_hash()
                    .await
                    .map_err(channel_err)?
                    .flatten();
                handle
                    .authenticate_publickey(
                        config.username.as_str(),
                        PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                    )
                    .await
            }
            Credential::None => handle.authenticate_none(config.username.as_str()).await,
        }
        .map_err(|e| TransportError::Auth(format!("{}: {e}", config.endpoint())))?;

        if !auth.success() {
            close_handle(&handle).await;
            return Err(TransportError::Auth(config.endpoint()));
        }
        Ok(handle)
    }

    async fn open_sftp(
        handle: &client::Handle<ClientHandler>,
    ) -> Result<SftpSession, TransportError> {
        let channel = handle.channel_open_session().await.map_err(channel_err)?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(sftp_err)?;
        SftpSession::new(channel.into_stream())
            .await
            .map_err(sftp_err)
    }
}

fn load_key(path: &Path, passphrase: Option<&str>) -> Result<PrivateKey, TransportError> {
    load_secret_key(path, passphrase)
        .map_err(|e| TransportError::Auth(format!("cannot load key {}: {e}", path.display())))
}

async fn close_handle(handle: &client::Handle<ClientHandler>) {
    if let Err(e) = handle
        .disconnect(Disconnect::ByApplication, "", "en")
        .await
    {
        debug!(error = %e, "Disconnect after failure");
    }
}

#[async_trait]
impl Connector for RusshConnector {
    async fn connect(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn RemoteSession>, TransportError> {
        let timeout = config.timeout();
        let handle = tokio::time::timeout(timeout, self.handshake(config))
            .await
            .map_err(|_| TransportError::Timeout(timeout.as_secs()))??;

        // Both channels or nothing.
        let sftp = match tokio::time::timeout(timeout, Self::open_sftp(&handle)).await {
            Ok(Ok(sftp)) => sftp,
            Ok(Err(e)) => {
                close_handle(&handle).await;
                return Err(e);
            }
            Err(_) => {
                close_handle(&handle).await;
                return Err(TransportError::Timeout(timeout.as_secs()));
            }
        };

        info!(endpoint = %config.endpoint(), "SSH session established");
        Ok(Box::new(RusshSession { handle, sftp }))
    }
}

/// An authenticated SSH session plus its SFTP channel.
pub struct RusshSession {
    handle: client::Handle<ClientHandler>,
    sftp: SftpSession,
}

#[async_trait]
impl RemoteSession for RusshSession {
    async fn exec(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecOutput, TransportError> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(session_err)?;
        channel.exec(true, command).await.map_err(session_err)?;

        let mut output = ExecOutput::default();
        let collect = async {
            while let Some(msg) = channel.wait().await {
                match msg {
                    ChannelMsg::Data { ref data } => output.stdout.extend_from_slice(data),
                    ChannelMsg::ExtendedData { ref data, ext: 1 } => {
                        output.stderr.extend_from_slice(data);
                    }
                    ChannelMsg::ExitStatus { exit_status } => output.exit_code = Some(exit_status),
                    _ => {}
                }
            }
        };
        tokio::time::timeout(timeout, collect)
            .await
            .map_err(|_| TransportError::Timeout(timeout.as_secs()))?;
        Ok(output)
    }

    async fn upload(&mut self, local: &Path, remote: &str) -> Result<u64, TransportError> {
        let mut source = tokio::fs::File::open(local).await?;
        let mut target = self.sftp.create(remote).await.map_err(sftp_err)?;
        let bytes = tokio::io::copy(&mut source, &mut target).await?;
        target.shutdown().await?;
        Ok(bytes)
    }

    async fn download(&mut self, remote: &str, local: &Path) -> Result<u64, TransportError> {
        let mut source = self.sftp.open(remote).await.map_err(sftp_err)?;
        let mut target = tokio::fs::File::create(local).await?;
        let bytes = tokio::io::copy(&mut source, &mut target).await?;
        target.flush().await?;
        Ok(bytes)
    }

    async fn open_shell(&mut self, term: &str) -> Result<Box<dyn ShellChannel>, TransportError> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(session_err)?;
        channel
            .request_pty(false, term, SHELL_COLS, SHELL_ROWS, 0, 0, &[])
            .await
            .map_err(session_err)?;
        channel.request_shell(false).await.map_err(session_err)?;
        Ok(Box::new(RusshShell::new(channel)))
    }

    async fn close(&mut self) {
        if let Err(e) = self.sftp.close().await {
            warn!(error = %e, "Closing SFTP channel");
        }
        close_handle(&self.handle).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_session_errors_mean_closed() {
        assert!(matches!(session_err(russh::Error::Disconnect), TransportError::Closed));
        assert!(matches!(session_err(russh::Error::HUP), TransportError::Closed));
        assert!(matches!(session_err(russh::Error::SendError), TransportError::Closed));
        assert!(matches!(
            session_err(russh::Error::WrongChannel),
            TransportError::Channel(_)
        ));
    }

    #[test]
    fn test_missing_key_is_auth_error() {
        let err = load_key(Path::new("/nonexistent/id_ed25519"), None).unwrap_err();
        assert!(matches!(err, TransportError::Auth(msg) if msg.contains("/nonexistent/id_ed25519")));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_fails_without_session() {
        // Port 1 on loopback is closed on any sane test host.
        let config = ConnectionConfig::new("127.0.0.1", "nobody")
            .with_port(1)
            .with_password("x")
            .with_timeout(Duration::from_secs(5));
        let result = RusshConnector::new().connect(&config).await;
        assert!(matches!(
            result,
            Err(TransportError::Connect(_) | TransportError::Timeout(_))
        ));
    }
}
