//! Conversation sessions bound to named connections.
//!
//! Provides:
//! - `SessionRegistry` - Session map with message log, cleanup and shell binding
//! - `SessionSnapshot` - Export/import format

pub mod message;
pub mod registry;
pub mod session;
pub mod snapshot;

pub use message::{Message, MessageId, Role};
pub use registry::{SessionError, SessionRegistry, ShellRebinding, inactivity_threshold};
pub use session::{Session, SessionContext, SessionId, SessionSummary};
pub use snapshot::SessionSnapshot;
