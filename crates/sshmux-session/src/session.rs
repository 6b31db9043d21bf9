//! Session state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sshmux_core::ShellId;
use uuid::Uuid;

use crate::{Message, MessageId};

pub type SessionId = Uuid;

/// Working directory given to new sessions.
pub const DEFAULT_WORKING_DIRECTORY: &str = "/home";

/// Conversation state bound by name to a connection.
///
/// The connection is referenced by name only; removing the connection
/// leaves the session untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: SessionId,
    pub name: String,
    pub connection_name: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub messages: Vec<Message>,
    pub working_directory: String,
    pub environment: BTreeMap<String, String>,
    /// Shell in the connection's arena this session writes to.
    pub shell: Option<ShellId>,
}

impl Session {
    /// Empty session in the default working directory.
    #[must_use]
    pub fn new(name: impl Into<String>, connection_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            connection_name: connection_name.into(),
            created_at: now,
            last_activity: now,
            messages: Vec::new(),
            working_directory: DEFAULT_WORKING_DIRECTORY.to_string(),
            environment: BTreeMap::new(),
            shell: None,
        }
    }

    /// Append a message and bump activity.
    ///
    /// The timestamp is clamped so the log never goes backwards.
    pub fn push(&mut self, mut message: Message) -> MessageId {
        if let Some(last) = self.messages.last() {
            message.timestamp = message.timestamp.max(last.timestamp);
        }
        self.last_activity = self.last_activity.max(message.timestamp);
        let id = message.id;
        self.messages.push(message);
        id
    }

    /// The last `count` messages, oldest first.
    #[must_use]
    pub fn recent(&self, count: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(count);
        &self.messages[start..]
    }

    /// Bump `last_activity` to now, never backwards.
    pub fn touch(&mut self) {
        self.last_activity = self.last_activity.max(Utc::now());
    }

    /// Listing row for this session.
    #[must_use]
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            name: self.name.clone(),
            connection_name: self.connection_name.clone(),
            created_at: self.created_at,
            last_activity: self.last_activity,
            message_count: self.messages.len(),
            working_directory: self.working_directory.clone(),
            environment: self.environment.clone(),
        }
    }

    /// Metadata view without messages.
    #[must_use]
    pub fn context(&self) -> SessionContext {
        SessionContext {
            session_id: self.id,
            name: self.name.clone(),
            connection_name: self.connection_name.clone(),
            working_directory: self.working_directory.clone(),
            environment: self.environment.clone(),
            message_count: self.messages.len(),
            last_activity: self.last_activity,
            shell_active: self.shell.is_some(),
        }
    }
}

/// Listing entry for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub name: String,
    pub connection_name: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub message_count: usize,
    pub working_directory: String,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

/// What a caller needs to continue a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: SessionId,
    pub name: String,
    pub connection_name: String,
    pub working_directory: String,
    pub environment: BTreeMap<String, String>,
    pub message_count: usize,
    pub last_activity: DateTime<Utc>,
    pub shell_active: bool,
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::Role;

    #[test]
    fn test_defaults() {
        let session = Session::new("s1", "a");

        assert_eq!(session.working_directory, "/home");
        assert!(session.environment.is_empty());
        assert!(session.shell.is_none());
        assert_eq!(session.created_at, session.last_activity);
    }

    #[test]
    fn test_recent_window() {
        let mut session = Session::new("s1", "a");
        for i in 0..5 {
            session.push(Message::new(Role::User, i.to_string()));
        }

        let contents = |count| -> Vec<String> {
            session
                .recent(count)
                .iter()
                .map(|m| m.content.clone())
                .collect()
        };

        assert_eq!(contents(2), ["3", "4"]);
        assert_eq!(contents(5).len(), 5);
        assert_eq!(contents(50).len(), 5);
        assert!(contents(0).is_empty());
    }

    #[test]
    fn test_timestamps_never_go_backwards() {
        let mut session = Session::new("s1", "a");
        session.push(Message::new(Role::User, "first"));
        let mut stale = Message::new(Role::Assistant, "second");
        stale.timestamp -= TimeDelta::hours(1);

        session.push(stale);

        assert!(session.messages[1].timestamp >= session.messages[0].timestamp);
    }

    #[test]
    fn test_push_bumps_activity() {
        let mut session = Session::new("s1", "a");
        session.last_activity -= TimeDelta::hours(2);
        let before = session.last_activity;

        session.push(Message::new(Role::User, "hi"));

        assert!(session.last_activity > before);
    }
}
