//! Named tool calls over the connection and session registries.
//!
//! Provides:
//! - `ToolCall` - Typed tool invocations parsed from name plus arguments
//! - `Dispatcher` - Runs calls and returns JSON result maps

pub mod dispatcher;
pub mod protocol;

pub use dispatcher::Dispatcher;
pub use protocol::{DispatchError, SnapshotInput, TOOL_NAMES, ToolCall};
