//! Portable session snapshots.
//!
//! A snapshot carries everything needed to rebuild a session with the same
//! id, metadata and message order. Shell bindings are runtime state and
//! are left out.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Message, Session, SessionId, session::DEFAULT_WORKING_DIRECTORY};

/// Session metadata within a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub id: SessionId,
    pub name: String,
    pub connection_name: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub message_count: usize,
    #[serde(default = "default_working_directory")]
    pub working_directory: String,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

fn default_working_directory() -> String {
    DEFAULT_WORKING_DIRECTORY.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session: SnapshotHeader,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl SessionSnapshot {
    /// Copy a session for export. The shell binding is left out.
    #[must_use]
    pub fn capture(session: &Session) -> Self {
        Self {
            session: SnapshotHeader {
                id: session.id,
                name: session.name.clone(),
                connection_name: session.connection_name.clone(),
                created_at: session.created_at,
                last_activity: session.last_activity,
                message_count: session.messages.len(),
                working_directory: session.working_directory.clone(),
                environment: session.environment.clone(),
            },
            messages: session.messages.clone(),
        }
    }

    /// Rebuild the session. Messages are restored verbatim.
    #[must_use]
    pub fn restore(self) -> Session {
        let header = self.session;
        Session {
            id: header.id,
            name: header.name,
            connection_name: header.connection_name,
            created_at: header.created_at,
            last_activity: header.last_activity,
            messages: self.messages,
            working_directory: header.working_directory,
            environment: header.environment,
            shell: None,
        }
    }

    /// Id the snapshot restores under.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.session.id
    }

    /// Pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if a message result cannot be serialized.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// # Errors
    ///
    /// Returns an error if `json` is not a valid snapshot.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Role;

    #[test]
    fn test_capture_restore_preserves_everything_but_shell() {
        let mut session = Session::new("s1", "a");
        session.working_directory = "/srv".into();
        session.environment.insert("LANG".into(), "C".into());
        session.push(Message::new(Role::User, "ls"));
        session.shell = Some(sshmux_core::ShellId::new());

        let restored = SessionSnapshot::capture(&session).restore();

        assert_eq!(restored.id, session.id);
        assert_eq!(restored.messages, session.messages);
        assert_eq!(restored.working_directory, "/srv");
        assert_eq!(restored.environment, session.environment);
        assert!(restored.shell.is_none());
    }

    #[test]
    fn test_json_layout() {
        let session = Session::new("s1", "a");
        let json = SessionSnapshot::capture(&session).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["session"]["name"], "s1");
        assert_eq!(value["session"]["connection_name"], "a");
        assert_eq!(value["session"]["message_count"], 0);
        assert!(value["messages"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_missing_directory_defaults() {
        let json = r#"{
            "session": {
                "id": "6f1c2b9e-8f0e-4c53-9d7a-3a1e5b0c9d11",
                "name": "old",
                "connection_name": "a",
                "created_at": "2024-01-01T00:00:00Z",
                "last_activity": "2024-01-01T00:00:00Z"
            },
            "messages": []
        }"#;

        let snapshot = SessionSnapshot::from_json(json).unwrap();

        assert_eq!(snapshot.session.working_directory, "/home");
        assert!(snapshot.session.environment.is_empty());
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(SessionSnapshot::from_json("{\"session\": 1}").is_err());
    }
}
