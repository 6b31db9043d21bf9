//! Named, pooled remote-shell connections.
//!
//! Provides:
//! - `Connection` - One endpoint with serialized I/O and a shell arena
//! - `ConnectionRegistry` - Name to connection map with pass-through operations
//! - `KeepaliveScheduler` - Cancellable periodic liveness probe

pub mod connection;
pub mod error;
pub mod keepalive;
pub mod registry;
pub mod shell;

pub use connection::{Connection, ConnectionInfo};
pub use error::PoolError;
pub use keepalive::KeepaliveScheduler;
pub use registry::ConnectionRegistry;
