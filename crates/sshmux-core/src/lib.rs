//! Core abstractions for pooled remote-shell connections.
//!
//! This crate provides the fundamental building blocks:
//! - `ConnectionConfig` - Target endpoint and credential record
//! - `Settings` - Tunables loaded from the environment or a JSON file
//! - Outcome types - Structured results with a `success` discriminant
//! - `Connector`, `RemoteSession`, `ShellChannel` - Transport traits
//! - Directory listing parser

pub mod config;
pub mod error;
pub mod listing;
pub mod outcome;
pub mod settings;
pub mod traits;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use config::{ConnectionConfig, Credential};
pub use error::{ConfigError, TransportError};
pub use listing::{DeviceNumber, DirEntry, EntryKind};
pub use outcome::{
    Ack, CONNECTION_NOT_FOUND, CommandOutcome, FailureKind, ListingOutcome, ShellOpened,
    ShellOutput, TransferDirection, TransferOutcome,
};
pub use settings::{Settings, ShellBindingPolicy, ShellReadLimits};
pub use traits::{Connector, ExecOutput, RemoteSession, ShellChannel, ShellId};
