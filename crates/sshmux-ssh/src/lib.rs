//! russh-backed transport for sshmux connections.
//!
//! Provides:
//! - `RusshConnector` - Handshake, authentication and SFTP channel setup
//! - `RusshSession` - Command execution and file transfer
//! - `RusshShell` - PTY-backed interactive shell channel

pub mod client;
pub mod shell;

pub use client::{RusshConnector, RusshSession};
pub use shell::RusshShell;
