//! Interactive shell channel.

use std::time::Duration;

use async_trait::async_trait;
use russh::{Channel, ChannelMsg, client};
use sshmux_core::{ShellChannel, TransportError};
use tokio::time::Instant;

use crate::client::session_err;

/// A PTY-backed shell opened on an SSH session.
pub struct RusshShell {
    channel: Channel<client::Msg>,
    closed: bool,
}

impl RusshShell {
    #[must_use]
    pub const fn new(channel: Channel<client::Msg>) -> Self {
        Self {
            channel,
            closed: false,
        }
    }
}

#[async_trait]
impl ShellChannel for RusshShell {
    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ShellExited);
        }
        self.channel.data(data).await.map_err(session_err)
    }

    async fn read_available(&mut self, wait: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        if self.closed {
            return Err(TransportError::ShellExited);
        }
        let deadline = Instant::now() + wait;
        loop {
            match tokio::time::timeout_at(deadline, self.channel.wait()).await {
                Err(_) => return Ok(None),
                Ok(Some(ChannelMsg::Data { data } | ChannelMsg::ExtendedData { data, .. })) => {
                    return Ok(Some(data.to_vec()));
                }
                Ok(None | Some(ChannelMsg::Eof | ChannelMsg::Close)) => {
                    self.closed = true;
                    return Err(TransportError::ShellExited);
                }
                // Window adjustments, exit status and the like.
                Ok(Some(_)) => {}
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.channel.close().await.map_err(session_err)
    }
}
