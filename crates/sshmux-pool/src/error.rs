//! Pool errors.

use sshmux_core::{FailureKind, TransportError};
use thiserror::Error;

/// Why a connection could not be added.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Connection {name} failed: {source}")]
    Connect {
        name: String,
        #[source]
        source: TransportError,
    },
    #[error("Connection limit reached ({max})")]
    LimitReached { max: usize },
}

impl PoolError {
    /// Failure category for structured results.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Connect { .. } => FailureKind::Connectivity,
            Self::LimitReached { .. } => FailureKind::Limit,
        }
    }
}
