//! Session registry.
//!
//! Sessions reference connections by name only. Nothing here consults the
//! connection registry; callers resolve the name at use time.

use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use sshmux_core::{FailureKind, Settings, ShellId};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{
    Message, MessageId, Role, Session, SessionContext, SessionId, SessionSnapshot, SessionSummary,
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session limit reached ({max})")]
    LimitReached { max: usize },
    #[error("Session not found: {0}")]
    NotFound(SessionId),
    #[error("Invalid snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),
}

impl SessionError {
    /// Failure category reported to callers.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::LimitReached { .. } => FailureKind::Limit,
            Self::NotFound(_) => FailureKind::NotFound,
            Self::Snapshot(_) => FailureKind::Invalid,
        }
    }
}

/// Inactivity window for `max_inactive_hours`, saturating on overflow.
#[must_use]
pub fn inactivity_threshold(max_inactive_hours: u64) -> TimeDelta {
    let hours = i64::try_from(max_inactive_hours).unwrap_or(i64::MAX);
    TimeDelta::try_hours(hours).unwrap_or(TimeDelta::MAX)
}

/// Result of binding one shell to every session on a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellRebinding {
    /// Sessions now holding the new shell.
    pub sessions: Vec<SessionId>,
    /// Distinct shells those sessions held before, none of them still bound.
    pub replaced: Vec<ShellId>,
}

/// Id-keyed map of sessions behind one lock.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Session>>,
    max_sessions: Option<usize>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(Settings::default().session_limit())
    }
}

impl SessionRegistry {
    /// `None` disables the session cap.
    #[must_use]
    pub fn new(max_sessions: Option<usize>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
        }
    }

    /// Registry capped by `max_sessions` from settings.
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.session_limit())
    }

    /// Create a session bound to `connection_name`.
    ///
    /// The connection is not checked; only the session cap can refuse.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::LimitReached` when the cap is full.
    pub async fn create_session(
        &self,
        name: impl Into<String>,
        connection_name: impl Into<String>,
    ) -> Result<SessionId, SessionError> {
        let session = Session::new(name, connection_name);
        let id = session.id;

        let mut sessions = self.sessions.write().await;
        if let Some(max) = self.max_sessions {
            if sessions.len() >= max {
                return Err(SessionError::LimitReached { max });
            }
        }
        info!(
            session = %id,
            name = %session.name,
            connection = %session.connection_name,
            "Session created"
        );
        sessions.insert(id, session);
        Ok(id)
    }

    /// Clone of the session, messages included.
    pub async fn get_session(&self, id: SessionId) -> Option<Session> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Whether a session with `id` exists.
    pub async fn contains(&self, id: SessionId) -> bool {
        self.sessions.read().await.contains_key(&id)
    }

    /// All sessions, oldest first.
    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<_> = self
            .sessions
            .read()
            .await
            .values()
            .map(Session::summary)
            .collect();
        summaries.sort_by_key(|s| (s.created_at, s.id));
        summaries
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether no session exists.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Returns `false` if the session did not exist.
    pub async fn delete_session(&self, id: SessionId) -> bool {
        self.remove_session(id).await.is_some()
    }

    /// Remove a session and hand it back, shell binding included.
    pub async fn remove_session(&self, id: SessionId) -> Option<Session> {
        let removed = self.sessions.write().await.remove(&id);
        if removed.is_some() {
            info!(session = %id, "Session deleted");
        }
        removed
    }

    async fn append(&self, id: SessionId, message: Message) -> Option<MessageId> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&id)?;
        let message_id = session.push(message);
        debug!(session = %id, message = %message_id, "Message appended");
        Some(message_id)
    }

    /// Returns `None` if the session does not exist.
    pub async fn add_user_message(
        &self,
        id: SessionId,
        content: impl Into<String>,
    ) -> Option<MessageId> {
        self.append(id, Message::new(Role::User, content)).await
    }

    /// Returns `None` if the session does not exist.
    pub async fn add_assistant_message(
        &self,
        id: SessionId,
        content: impl Into<String>,
        command: Option<&str>,
        result: Option<Value>,
    ) -> Option<MessageId> {
        let mut message = Message::new(Role::Assistant, content);
        if let Some(command) = command {
            message = message.with_command(command);
        }
        if let Some(result) = result {
            message = message.with_result(result);
        }
        self.append(id, message).await
    }

    /// The most recent `count` messages, oldest first.
    ///
    /// Empty when the session is absent or has no messages.
    pub async fn get_session_history(&self, id: SessionId, count: usize) -> Vec<Message> {
        self.sessions
            .read()
            .await
            .get(&id)
            .map(|s| s.recent(count).to_vec())
            .unwrap_or_default()
    }

    /// Metadata without the message log.
    pub async fn get_session_context(&self, id: SessionId) -> Option<SessionContext> {
        self.sessions.read().await.get(&id).map(Session::context)
    }

    /// Returns `false` if the session does not exist.
    pub async fn update_working_directory(
        &self,
        id: SessionId,
        directory: impl Into<String>,
    ) -> bool {
        match self.sessions.write().await.get_mut(&id) {
            Some(session) => {
                session.working_directory = directory.into();
                true
            }
            None => false,
        }
    }

    /// Merge variables into the session environment.
    ///
    /// Returns `false` if the session does not exist.
    pub async fn update_environment<I>(&self, id: SessionId, vars: I) -> bool
    where
        I: IntoIterator<Item = (String, String)>,
    {
        match self.sessions.write().await.get_mut(&id) {
            Some(session) => {
                session.environment.extend(vars);
                true
            }
            None => false,
        }
    }

    /// Remove sessions idle for more than `max_inactive_hours`.
    pub async fn cleanup_inactive_sessions(&self, max_inactive_hours: u64) -> Vec<SessionId> {
        self.cleanup_inactive_at(Utc::now(), inactivity_threshold(max_inactive_hours))
            .await
    }

    /// Remove sessions whose `now - last_activity` exceeds `threshold`.
    pub async fn cleanup_inactive_at(
        &self,
        now: DateTime<Utc>,
        threshold: TimeDelta,
    ) -> Vec<SessionId> {
        self.remove_inactive_at(now, threshold)
            .await
            .into_iter()
            .map(|s| s.id)
            .collect()
    }

    /// Like [`SessionRegistry::cleanup_inactive_at`], returning the removed
    /// sessions so their shells can be released.
    pub async fn remove_inactive_at(&self, now: DateTime<Utc>, threshold: TimeDelta) -> Vec<Session> {
        let mut sessions = self.sessions.write().await;
        let stale: Vec<SessionId> = sessions
            .values()
            .filter(|s| now.signed_duration_since(s.last_activity) > threshold)
            .map(|s| s.id)
            .collect();
        let mut removed = Vec::with_capacity(stale.len());
        for id in stale {
            if let Some(session) = sessions.remove(&id) {
                info!(session = %id, shell = ?session.shell, "Inactive session removed");
                removed.push(session);
            }
        }
        removed
    }

    /// Snapshot of the session, without its shell binding.
    pub async fn export_session(&self, id: SessionId) -> Option<SessionSnapshot> {
        self.sessions
            .read()
            .await
            .get(&id)
            .map(SessionSnapshot::capture)
    }

    /// Restore a session under its original id, replacing any session that
    /// already has it.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::LimitReached` if the id is new and the cap is full.
    pub async fn import_session(&self, snapshot: SessionSnapshot) -> Result<SessionId, SessionError> {
        let session = snapshot.restore();
        let id = session.id;

        let mut sessions = self.sessions.write().await;
        if let Some(max) = self.max_sessions {
            if !sessions.contains_key(&id) && sessions.len() >= max {
                return Err(SessionError::LimitReached { max });
            }
        }
        info!(
            session = %id,
            name = %session.name,
            messages = session.messages.len(),
            "Session imported"
        );
        sessions.insert(id, session);
        Ok(id)
    }

    /// Parse and import a JSON snapshot.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Snapshot` for malformed JSON, otherwise as
    /// [`SessionRegistry::import_session`].
    pub async fn import_json(&self, json: &str) -> Result<SessionId, SessionError> {
        self.import_session(SessionSnapshot::from_json(json)?).await
    }

    /// Bind a shell to one session, returning the shell it replaces.
    ///
    /// The swap happens under the registry lock, so concurrent binds each
    /// see the shell the other one installed.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotFound` if the session is absent.
    pub async fn attach_shell(
        &self,
        id: SessionId,
        shell: ShellId,
    ) -> Result<Option<ShellId>, SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        let previous = session.shell.replace(shell);
        session.touch();
        Ok(previous.filter(|old| *old != shell))
    }

    /// Bind a shell to every session on `connection_name`.
    pub async fn attach_shell_to_connection(
        &self,
        connection_name: &str,
        shell: ShellId,
    ) -> ShellRebinding {
        let mut sessions = self.sessions.write().await;
        let mut rebinding = ShellRebinding::default();
        for session in sessions
            .values_mut()
            .filter(|s| s.connection_name == connection_name)
        {
            if let Some(old) = session.shell.replace(shell) {
                if old != shell && !rebinding.replaced.contains(&old) {
                    rebinding.replaced.push(old);
                }
            }
            session.touch();
            rebinding.sessions.push(session.id);
        }
        rebinding
    }

    /// The shell bound to a session, if any.
    pub async fn shell_of(&self, id: SessionId) -> Option<ShellId> {
        self.sessions.read().await.get(&id).and_then(|s| s.shell)
    }

    /// Whether the session exists and holds a shell.
    pub async fn is_shell_active(&self, id: SessionId) -> bool {
        self.shell_of(id).await.is_some()
    }

    /// Whether any session still holds `shell`.
    pub async fn is_shell_bound(&self, shell: ShellId) -> bool {
        self.sessions
            .read()
            .await
            .values()
            .any(|s| s.shell == Some(shell))
    }

    /// Unbind the session's shell. Returns `false` if the session is absent.
    pub async fn detach_shell(&self, id: SessionId) -> bool {
        match self.sessions.write().await.get_mut(&id) {
            Some(session) => {
                session.shell = None;
                session.touch();
                true
            }
            None => false,
        }
    }

    /// Unbind `shell` from every session holding it.
    pub async fn detach_shell_everywhere(&self, shell: ShellId) -> Vec<SessionId> {
        let mut sessions = self.sessions.write().await;
        let mut detached = Vec::new();
        for session in sessions.values_mut().filter(|s| s.shell == Some(shell)) {
            session.shell = None;
            session.touch();
            detached.push(session.id);
        }
        detached
    }

    /// Ids of sessions referencing `connection_name`.
    pub async fn sessions_for_connection(&self, connection_name: &str) -> Vec<SessionId> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.connection_name == connection_name)
            .map(|s| s.id)
            .collect()
    }
}
