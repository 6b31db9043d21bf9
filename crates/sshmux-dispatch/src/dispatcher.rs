//! Routes tool calls to the connection and session registries.
//!
//! Every call returns a JSON map with a `success` field. Failures carry
//! `error` and `kind`; nothing here panics or returns `Err` to the caller.

use std::{path::Path, sync::Arc, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use serde_json::{Map, Value, json};
use sshmux_core::{
    ConnectionConfig, Connector, FailureKind, Settings, ShellBindingPolicy, ShellId, ShellOpened,
};
use sshmux_pool::ConnectionRegistry;
use sshmux_session::{
    Session, SessionId, SessionRegistry, SessionSnapshot, inactivity_threshold,
};
use tracing::{debug, info, warn};

use crate::protocol::{SnapshotInput, ToolCall};

const SESSION_NOT_FOUND: &str = "session not found";
const NO_ACTIVE_SHELL: &str = "session has no active shell";

fn failure(kind: FailureKind, error: impl Into<String>) -> Value {
    json!({ "success": false, "error": error.into(), "kind": kind })
}

/// `{"success": true}` merged with the fields of `extra`.
fn success(extra: Value) -> Value {
    let mut map = match extra {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    map.insert("success".to_string(), Value::Bool(true));
    Value::Object(map)
}

fn to_value<T: Serialize>(outcome: &T) -> Value {
    serde_json::to_value(outcome).unwrap_or_else(|e| failure(FailureKind::Invalid, e.to_string()))
}

/// Attach extra fields to an outcome map.
fn with_fields(mut value: Value, extra: Value) -> Value {
    if let (Value::Object(map), Value::Object(extra)) = (&mut value, extra) {
        map.extend(extra);
    }
    value
}

/// Front door for named tool calls.
#[derive(Clone)]
pub struct Dispatcher {
    connections: ConnectionRegistry,
    sessions: Arc<SessionRegistry>,
    settings: Settings,
}

impl Dispatcher {
    /// Build both registries from `settings`.
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, settings: Settings) -> Self {
        let connections = ConnectionRegistry::with_settings(connector, settings.clone());
        let sessions = Arc::new(SessionRegistry::from_settings(&settings));
        Self::with_registries(connections, sessions, settings)
    }

    /// Build from existing registries, e.g. to share them with other front ends.
    #[must_use]
    pub const fn with_registries(
        connections: ConnectionRegistry,
        sessions: Arc<SessionRegistry>,
        settings: Settings,
    ) -> Self {
        Self {
            connections,
            sessions,
            settings,
        }
    }

    /// Connection registry behind the tools.
    #[must_use]
    pub const fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    /// Session registry behind the tools.
    #[must_use]
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Parse and run a call by name.
    pub async fn call(&self, tool: &str, arguments: Value) -> Value {
        match ToolCall::parse(tool, arguments) {
            Ok(call) => self.dispatch(call).await,
            Err(e) => {
                warn!(tool, error = %e, "Rejected tool call");
                failure(e.kind(), e.to_string())
            }
        }
    }

    /// Run an already parsed call.
    pub async fn dispatch(&self, call: ToolCall) -> Value {
        debug!(tool = call.name(), "Dispatching");
        match call {
            ToolCall::SshConnect {
                name,
                host,
                username,
                port,
                password,
                key_filename,
                passphrase,
                timeout,
            } => {
                let config = match host.zip(username) {
                    Some((host, username)) => {
                        let mut config = ConnectionConfig::new(host, username)
                            .with_port(port.unwrap_or(22))
                            .with_timeout(Duration::from_secs(
                                timeout.unwrap_or(self.settings.default_timeout_secs),
                            ));
                        if let Some(password) = password {
                            config = config.with_password(password);
                        }
                        if let Some(key) = key_filename {
                            config = config.with_key_file(key, passphrase);
                        }
                        config
                    }
                    None => match self.settings.connections.get(&name) {
                        Some(preset) => preset.clone(),
                        None => {
                            return failure(
                                FailureKind::Invalid,
                                format!("host and username are required (no preset named {name})"),
                            );
                        }
                    },
                };
                self.ssh_connect(name, config).await
            }
            ToolCall::SshDisconnect { name } => {
                self.connections.remove_connection(&name).await;
                success(json!({ "name": name }))
            }
            ToolCall::SshListConnections {} => {
                let connections = self.connections.list_connections().await;
                success(json!({ "count": connections.len(), "connections": connections }))
            }
            ToolCall::SshExecute {
                connection,
                command,
                timeout,
            } => to_value(
                &self
                    .connections
                    .execute_command(&connection, &command, timeout.map(Duration::from_secs))
                    .await,
            ),
            ToolCall::SshUpload {
                connection,
                local_path,
                remote_path,
            } => to_value(
                &self
                    .connections
                    .upload_file(&connection, Path::new(&local_path), &remote_path)
                    .await,
            ),
            ToolCall::SshDownload {
                connection,
                remote_path,
                local_path,
            } => to_value(
                &self
                    .connections
                    .download_file(&connection, &remote_path, Path::new(&local_path))
                    .await,
            ),
            ToolCall::SshList { connection, path } => {
                to_value(&self.connections.list_directory(&connection, &path).await)
            }
            ToolCall::SshShell {
                connection,
                session_id,
                term,
            } => self.ssh_shell(connection, session_id, &term).await,
            ToolCall::ShellSend {
                session_id,
                command,
            } => self.shell_send(session_id, &command).await,
            ToolCall::ShellClose { session_id } => self.shell_close(session_id).await,
            ToolCall::SessionCreate { name, connection } => {
                self.session_create(name, connection).await
            }
            ToolCall::SessionList {} => {
                let sessions = self.sessions.list_sessions().await;
                success(json!({ "count": sessions.len(), "sessions": sessions }))
            }
            ToolCall::SessionDelete { session_id } => self.session_delete(session_id).await,
            ToolCall::SessionExecute {
                session_id,
                command,
                timeout,
            } => self.session_execute(session_id, &command, timeout).await,
            ToolCall::SessionHistory { session_id, count } => {
                if !self.sessions.contains(session_id).await {
                    return failure(FailureKind::NotFound, SESSION_NOT_FOUND);
                }
                let messages = self.sessions.get_session_history(session_id, count).await;
                success(json!({
                    "session_id": session_id,
                    "count": messages.len(),
                    "messages": messages,
                }))
            }
            ToolCall::SessionContext { session_id } => {
                match self.sessions.get_session_context(session_id).await {
                    Some(context) => success(to_value(&context)),
                    None => failure(FailureKind::NotFound, SESSION_NOT_FOUND),
                }
            }
            ToolCall::SessionExport { session_id } => {
                match self.sessions.export_session(session_id).await {
                    Some(snapshot) => success(json!({ "snapshot": snapshot })),
                    None => failure(FailureKind::NotFound, SESSION_NOT_FOUND),
                }
            }
            ToolCall::SessionImport { snapshot } => self.session_import(snapshot).await,
            ToolCall::SessionCleanup { max_inactive_hours } => {
                let hours = max_inactive_hours.unwrap_or(self.settings.session_cleanup_hours);
                self.session_cleanup(Utc::now(), inactivity_threshold(hours))
                    .await
            }
        }
    }

    /// Stop keep-alive and close every connection.
    pub async fn shutdown(&self) {
        self.connections.shutdown().await;
    }

    async fn ssh_connect(&self, name: String, config: ConnectionConfig) -> Value {
        let endpoint = config.endpoint();
        match self.connections.add_connection(name.clone(), config).await {
            Ok(()) => success(json!({ "name": name, "endpoint": endpoint })),
            Err(e) => failure(e.kind(), e.to_string()),
        }
    }

    async fn ssh_shell(
        &self,
        connection: Option<String>,
        session_id: Option<SessionId>,
        term: &str,
    ) -> Value {
        let session = match session_id {
            Some(id) => match self.sessions.get_session(id).await {
                Some(session) => Some(session),
                None => return failure(FailureKind::NotFound, SESSION_NOT_FOUND),
            },
            None => None,
        };

        let connection = match (connection, &session) {
            (Some(name), Some(session)) if name != session.connection_name => {
                return failure(
                    FailureKind::Invalid,
                    format!(
                        "session is bound to connection {}, not {name}",
                        session.connection_name
                    ),
                );
            }
            (Some(name), _) => name,
            (None, Some(session)) => session.connection_name.clone(),
            (None, None) => {
                return failure(FailureKind::Invalid, "connection or session_id is required");
            }
        };

        match self.settings.shell_binding {
            ShellBindingPolicy::PerSession => {
                let Some(session) = session else {
                    return failure(
                        FailureKind::Invalid,
                        "session_id is required when shells are bound per session",
                    );
                };
                let opened = self.connections.create_shell(&connection, term).await;
                let Some(shell) = opened.shell.filter(|_| opened.success) else {
                    return to_value(&opened);
                };
                match self.sessions.attach_shell(session.id, shell).await {
                    Ok(Some(previous)) => self.release_shell(&connection, previous).await,
                    Ok(None) => {}
                    Err(e) => {
                        // Deleted while the shell was opening.
                        self.close_quietly(&connection, shell).await;
                        return failure(e.kind(), SESSION_NOT_FOUND);
                    }
                }
                info!(connection = %connection, session = %session.id, shell = %shell, "Shell bound to session");
                shell_opened(&opened, &[session.id])
            }
            ShellBindingPolicy::FanOut => {
                let opened = self.connections.create_shell(&connection, term).await;
                let Some(shell) = opened.shell.filter(|_| opened.success) else {
                    return to_value(&opened);
                };
                let rebinding = self
                    .sessions
                    .attach_shell_to_connection(&connection, shell)
                    .await;
                for old in rebinding.replaced {
                    self.release_shell(&connection, old).await;
                }
                info!(connection = %connection, sessions = rebinding.sessions.len(), shell = %shell, "Shell bound to connection");
                shell_opened(&opened, &rebinding.sessions)
            }
        }
    }

    async fn shell_send(&self, session_id: SessionId, command: &str) -> Value {
        let Some(session) = self.sessions.get_session(session_id).await else {
            return failure(FailureKind::NotFound, SESSION_NOT_FOUND);
        };
        let Some(shell) = session.shell else {
            return failure(FailureKind::Shell, NO_ACTIVE_SHELL);
        };

        self.sessions.add_user_message(session_id, command).await;
        let outcome = self
            .connections
            .send_shell_command(&session.connection_name, shell, command)
            .await;
        let result = to_value(&outcome);
        self.sessions
            .add_assistant_message(session_id, outcome.summary(), Some(command), Some(result.clone()))
            .await;

        // The shell is gone from its connection; drop the stale binding.
        if outcome.kind == Some(FailureKind::NotFound) || outcome.kind == Some(FailureKind::Shell) {
            self.sessions.detach_shell_everywhere(shell).await;
        }
        result
    }

    async fn shell_close(&self, session_id: SessionId) -> Value {
        let Some(session) = self.sessions.get_session(session_id).await else {
            return failure(FailureKind::NotFound, SESSION_NOT_FOUND);
        };
        let Some(shell) = session.shell else {
            return failure(FailureKind::Shell, NO_ACTIVE_SHELL);
        };

        let ack = self.connections.close_shell(&session.connection_name, shell).await;
        if ack.success || ack.kind == Some(FailureKind::NotFound) {
            let detached = self.sessions.detach_shell_everywhere(shell).await;
            info!(session = %session_id, shell = %shell, sessions = detached.len(), "Shell closed");
            return with_fields(to_value(&ack), json!({ "shell": shell, "detached": detached }));
        }
        to_value(&ack)
    }

    async fn session_create(&self, name: String, connection: String) -> Value {
        if self.settings.require_connection_for_sessions
            && !self.connections.contains(&connection).await
        {
            return failure(FailureKind::NotFound, sshmux_core::CONNECTION_NOT_FOUND);
        }
        match self.sessions.create_session(name.clone(), connection.clone()).await {
            Ok(id) => success(json!({
                "session_id": id,
                "name": name,
                "connection": connection,
            })),
            Err(e) => failure(e.kind(), e.to_string()),
        }
    }

    async fn session_delete(&self, session_id: SessionId) -> Value {
        let Some(session) = self.sessions.remove_session(session_id).await else {
            return failure(FailureKind::NotFound, SESSION_NOT_FOUND);
        };
        self.release_sessions(&[session]).await;
        success(json!({ "session_id": session_id }))
    }

    async fn session_cleanup(&self, now: DateTime<Utc>, threshold: TimeDelta) -> Value {
        let removed = self.sessions.remove_inactive_at(now, threshold).await;
        self.release_sessions(&removed).await;
        let ids: Vec<SessionId> = removed.iter().map(|s| s.id).collect();
        success(json!({ "count": ids.len(), "removed": ids }))
    }

    async fn session_execute(
        &self,
        session_id: SessionId,
        command: &str,
        timeout: Option<u64>,
    ) -> Value {
        let Some(session) = self.sessions.get_session(session_id).await else {
            return failure(FailureKind::NotFound, SESSION_NOT_FOUND);
        };

        self.sessions.add_user_message(session_id, command).await;
        let outcome = self
            .connections
            .execute_command(
                &session.connection_name,
                command,
                timeout.map(Duration::from_secs),
            )
            .await;
        let result = to_value(&outcome);
        self.sessions
            .add_assistant_message(session_id, outcome.summary(), Some(command), Some(result.clone()))
            .await;
        result
    }

    async fn session_import(&self, snapshot: SnapshotInput) -> Value {
        let snapshot = match snapshot {
            SnapshotInput::Snapshot(snapshot) => *snapshot,
            SnapshotInput::Text(text) => match SessionSnapshot::from_json(&text) {
                Ok(snapshot) => snapshot,
                Err(e) => return failure(FailureKind::Invalid, format!("Invalid snapshot: {e}")),
            },
        };
        match self.sessions.import_session(snapshot).await {
            Ok(id) => success(json!({ "session_id": id })),
            Err(e) => failure(e.kind(), e.to_string()),
        }
    }

    /// Close the shells of removed sessions that no remaining session holds.
    async fn release_sessions(&self, removed: &[Session]) {
        for session in removed {
            if let Some(shell) = session.shell {
                self.release_shell(&session.connection_name, shell).await;
            }
        }
    }

    async fn release_shell(&self, connection: &str, shell: ShellId) {
        if !self.sessions.is_shell_bound(shell).await {
            self.close_quietly(connection, shell).await;
        }
    }

    async fn close_quietly(&self, connection: &str, shell: ShellId) {
        let ack = self.connections.close_shell(connection, shell).await;
        if !ack.success {
            debug!(connection, shell = %shell, error = ?ack.error, "Replaced shell already gone");
        }
    }
}

fn shell_opened(opened: &ShellOpened, sessions: &[SessionId]) -> Value {
    with_fields(to_value(opened), json!({ "sessions": sessions }))
}

#[cfg(test)]
mod tests {
    use sshmux_core::testing::MockConnector;

    use super::*;

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.shell.idle_ms = 20;
        settings
    }

    fn dispatcher(mock: &MockConnector, settings: Settings) -> Dispatcher {
        Dispatcher::new(Arc::new(mock.clone()), settings)
    }

    async fn connect(dispatcher: &Dispatcher, name: &str, host: &str) {
        let result = dispatcher
            .call(
                "ssh_connect",
                json!({"name": name, "host": host, "username": "deploy", "password": "pw"}),
            )
            .await;
        assert_eq!(result["success"], true, "{result}");
    }

    async fn create_session(dispatcher: &Dispatcher, name: &str, connection: &str) -> Value {
        let result = dispatcher
            .call("session_create", json!({"name": name, "connection": connection}))
            .await;
        assert_eq!(result["success"], true, "{result}");
        result["session_id"].clone()
    }

    #[tokio::test]
    async fn test_execute_then_disconnect() {
        let d = dispatcher(&MockConnector::new(), settings());
        connect(&d, "A", "a.example").await;

        let ran = d
            .call("ssh_execute", json!({"connection": "A", "command": "echo hi"}))
            .await;
        d.call("ssh_disconnect", json!({"name": "A"})).await;
        let after = d
            .call("ssh_execute", json!({"connection": "A", "command": "echo hi"}))
            .await;

        assert_eq!(ran["success"], true);
        assert_eq!(ran["stdout"], "hi\n");
        assert_eq!(ran["exit_code"], 0);
        assert_eq!(after["success"], false);
        assert_eq!(after["error"], "connection not found");
        assert_eq!(after["kind"], "not_found");
    }

    #[tokio::test]
    async fn test_unreachable_host() {
        let mock = MockConnector::new().refuse_host("down.example");
        let d = dispatcher(&mock, settings());

        let result = d
            .call(
                "ssh_connect",
                json!({"name": "B", "host": "down.example", "username": "root"}),
            )
            .await;
        let listed = d.call("ssh_list_connections", Value::Null).await;

        assert_eq!(result["success"], false);
        assert_eq!(result["kind"], "connectivity");
        assert_eq!(listed["count"], 0);
    }

    #[tokio::test]
    async fn test_connect_from_preset() {
        let mut settings = settings();
        settings.connections.insert(
            "staging".into(),
            ConnectionConfig::new("staging.example", "ops"),
        );
        let d = dispatcher(&MockConnector::new(), settings);

        let result = d.call("ssh_connect", json!({"name": "staging"})).await;
        let missing = d.call("ssh_connect", json!({"name": "nowhere"})).await;

        assert_eq!(result["success"], true);
        assert_eq!(result["endpoint"], "ops@staging.example:22");
        assert_eq!(missing["kind"], "invalid");
    }

    #[tokio::test]
    async fn test_unknown_tool_and_bad_arguments() {
        let d = dispatcher(&MockConnector::new(), settings());

        let unknown = d.call("format_disk", json!({})).await;
        let malformed = d.call("ssh_execute", json!({"connection": 5})).await;

        assert_eq!(unknown["success"], false);
        assert_eq!(unknown["kind"], "invalid");
        assert_eq!(malformed["kind"], "invalid");
    }

    #[tokio::test]
    async fn test_session_create_guard() {
        let d = dispatcher(&MockConnector::new(), settings());

        let guarded = d
            .call("session_create", json!({"name": "s1", "connection": "ghost"}))
            .await;

        assert_eq!(guarded["success"], false);
        assert_eq!(guarded["kind"], "not_found");

        let mut relaxed = settings();
        relaxed.require_connection_for_sessions = false;
        let d = dispatcher(&MockConnector::new(), relaxed);
        create_session(&d, "s1", "ghost").await;
    }

    #[tokio::test]
    async fn test_session_limit() {
        let mut settings = settings();
        settings.max_sessions = 1;
        let d = dispatcher(&MockConnector::new(), settings);
        connect(&d, "A", "a.example").await;
        create_session(&d, "s1", "A").await;

        let refused = d
            .call("session_create", json!({"name": "s2", "connection": "A"}))
            .await;

        assert_eq!(refused["kind"], "limit");
    }

    #[tokio::test]
    async fn test_session_execute_records_history() {
        let d = dispatcher(&MockConnector::new(), settings());
        connect(&d, "A", "a.example").await;
        let id = create_session(&d, "s1", "A").await;

        let ran = d
            .call("session_execute", json!({"session_id": id, "command": "echo hello"}))
            .await;
        let history = d
            .call("session_history", json!({"session_id": id, "count": 20}))
            .await;

        assert_eq!(ran["success"], true);
        assert_eq!(history["count"], 2);
        assert_eq!(history["messages"][0]["role"], "user");
        assert_eq!(history["messages"][0]["content"], "echo hello");
        assert_eq!(history["messages"][1]["role"], "assistant");
        assert_eq!(history["messages"][1]["command"], "echo hello");
        assert_eq!(history["messages"][1]["result"]["success"], true);
    }

    #[tokio::test]
    async fn test_dangling_connection_reference() {
        let d = dispatcher(&MockConnector::new(), settings());
        connect(&d, "A", "a.example").await;
        let id = create_session(&d, "s1", "A").await;
        d.call("ssh_disconnect", json!({"name": "A"})).await;

        let ran = d
            .call("session_execute", json!({"session_id": id, "command": "ls"}))
            .await;
        let context = d.call("session_context", json!({"session_id": id})).await;

        assert_eq!(ran["success"], false);
        assert_eq!(ran["error"], "connection not found");
        assert_eq!(context["success"], true);
        assert_eq!(context["connection_name"], "A");
        assert_eq!(context["message_count"], 2);
    }

    #[tokio::test]
    async fn test_per_session_shells_are_private() {
        let mock = MockConnector::new();
        let d = dispatcher(&mock, settings());
        connect(&d, "A", "a.example").await;
        let s1 = create_session(&d, "s1", "A").await;
        let s2 = create_session(&d, "s2", "A").await;

        let without_session = d.call("ssh_shell", json!({"connection": "A"})).await;
        let opened = d.call("ssh_shell", json!({"session_id": s1})).await;
        let sent = d
            .call("shell_send", json!({"session_id": s1, "command": "echo hi"}))
            .await;
        let other = d
            .call("shell_send", json!({"session_id": s2, "command": "echo hi"}))
            .await;

        assert_eq!(without_session["kind"], "invalid");
        assert_eq!(opened["success"], true);
        assert_eq!(opened["sessions"], json!([s1]));
        assert_eq!(opened["term"], "xterm");
        assert_eq!(sent["success"], true);
        assert!(sent["output"].as_str().unwrap().contains("hi"));
        assert_eq!(other["success"], false);
        assert_eq!(other["kind"], "shell");
        assert_eq!(mock.shells_opened(), 1);
    }

    #[tokio::test]
    async fn test_reopening_a_session_shell_closes_the_old_one() {
        let mock = MockConnector::new();
        let d = dispatcher(&mock, settings());
        connect(&d, "A", "a.example").await;
        let s1 = create_session(&d, "s1", "A").await;

        d.call("ssh_shell", json!({"session_id": s1})).await;
        d.call("ssh_shell", json!({"session_id": s1})).await;

        assert_eq!(mock.shells_opened(), 2);
        assert_eq!(mock.shells_closed(), 1);
    }

    #[tokio::test]
    async fn test_fan_out_binds_every_session_on_the_connection() {
        let mut settings = settings();
        settings.shell_binding = ShellBindingPolicy::FanOut;
        let mock = MockConnector::new();
        let d = dispatcher(&mock, settings);
        connect(&d, "A", "a.example").await;
        connect(&d, "B", "b.example").await;
        let s1 = create_session(&d, "s1", "A").await;
        let s2 = create_session(&d, "s2", "A").await;
        let s3 = create_session(&d, "s3", "B").await;

        let opened = d.call("ssh_shell", json!({"connection": "A"})).await;
        let c1 = d.call("session_context", json!({"session_id": s1})).await;
        let c2 = d.call("session_context", json!({"session_id": s2})).await;
        let c3 = d.call("session_context", json!({"session_id": s3})).await;

        assert_eq!(opened["sessions"].as_array().unwrap().len(), 2);
        assert_eq!(c1["shell_active"], true);
        assert_eq!(c2["shell_active"], true);
        assert_eq!(c3["shell_active"], false);

        let closed = d.call("shell_close", json!({"session_id": s1})).await;
        let after = d
            .call("shell_send", json!({"session_id": s2, "command": "echo hi"}))
            .await;

        assert_eq!(closed["success"], true);
        assert_eq!(closed["detached"].as_array().unwrap().len(), 2);
        assert_eq!(after["kind"], "shell");
        assert_eq!(mock.shells_closed(), 1);
    }

    #[tokio::test]
    async fn test_shell_close_without_shell() {
        let d = dispatcher(&MockConnector::new(), settings());
        connect(&d, "A", "a.example").await;
        let s1 = create_session(&d, "s1", "A").await;

        let result = d.call("shell_close", json!({"session_id": s1})).await;

        assert_eq!(result["success"], false);
        assert_eq!(result["kind"], "shell");
    }

    #[tokio::test]
    async fn test_export_delete_import() {
        let d = dispatcher(&MockConnector::new(), settings());
        connect(&d, "A", "a.example").await;
        let id = create_session(&d, "s1", "A").await;
        d.call("session_execute", json!({"session_id": id, "command": "echo one"}))
            .await;

        let exported = d.call("session_export", json!({"session_id": id})).await;
        let deleted = d.call("session_delete", json!({"session_id": id})).await;
        let gone = d.call("session_context", json!({"session_id": id})).await;
        let imported = d
            .call(
                "session_import",
                json!({"snapshot": exported["snapshot"].clone()}),
            )
            .await;
        let history = d.call("session_history", json!({"session_id": id})).await;

        assert_eq!(deleted["success"], true);
        assert_eq!(gone["kind"], "not_found");
        assert_eq!(imported["session_id"], id);
        assert_eq!(history["messages"], exported["snapshot"]["messages"]);
    }

    #[tokio::test]
    async fn test_import_from_text() {
        let d = dispatcher(&MockConnector::new(), settings());
        let snapshot = SessionSnapshot::capture(&sshmux_session::Session::new("s", "A"));
        let text = tokio_test::assert_ok!(snapshot.to_json());

        let imported = d.call("session_import", json!({"snapshot": text})).await;
        let broken = d.call("session_import", json!({"snapshot": "{not json"})).await;

        assert_eq!(imported["session_id"], json!(snapshot.id()));
        assert_eq!(broken["kind"], "invalid");
    }

    #[tokio::test]
    async fn test_history_of_missing_session() {
        let d = dispatcher(&MockConnector::new(), settings());

        let result = d
            .call("session_history", json!({"session_id": SessionId::new_v4()}))
            .await;

        assert_eq!(result["kind"], "not_found");
    }

    #[tokio::test]
    async fn test_cleanup_uses_configured_default() {
        let d = dispatcher(&MockConnector::new(), settings());
        connect(&d, "A", "a.example").await;
        create_session(&d, "s1", "A").await;

        let default = d.call("session_cleanup", json!({})).await;
        let list = d.call("session_list", json!({})).await;

        assert_eq!(default["count"], 0);
        assert_eq!(list["count"], 1);
    }

    #[tokio::test]
    async fn test_cleanup_closes_shells_of_removed_sessions() {
        let mock = MockConnector::new();
        let d = dispatcher(&mock, settings());
        connect(&d, "A", "a.example").await;
        let s1 = create_session(&d, "s1", "A").await;
        let s2 = create_session(&d, "s2", "A").await;
        d.call("ssh_shell", json!({"session_id": s1})).await;
        d.call("ssh_shell", json!({"session_id": s2})).await;

        let later = Utc::now() + TimeDelta::hours(2);
        let result = d.session_cleanup(later, inactivity_threshold(1)).await;

        assert_eq!(result["success"], true);
        assert_eq!(result["count"], 2);
        assert_eq!(mock.shells_opened(), 2);
        assert_eq!(mock.shells_closed(), 2);
    }

    #[tokio::test]
    async fn test_fan_out_shell_survives_partial_delete() {
        let mut settings = settings();
        settings.shell_binding = ShellBindingPolicy::FanOut;
        let mock = MockConnector::new();
        let d = dispatcher(&mock, settings);
        connect(&d, "A", "a.example").await;
        let s1 = create_session(&d, "s1", "A").await;
        let s2 = create_session(&d, "s2", "A").await;
        d.call("ssh_shell", json!({"connection": "A"})).await;

        d.call("session_delete", json!({"session_id": s1})).await;
        let still_open = mock.shells_closed();
        d.call("session_delete", json!({"session_id": s2})).await;

        assert_eq!(still_open, 0);
        assert_eq!(mock.shells_closed(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_shell_requests_leave_one_open() {
        let mock = MockConnector::new();
        let d = dispatcher(&mock, settings());
        connect(&d, "A", "a.example").await;
        let s1 = create_session(&d, "s1", "A").await;

        let (a, b) = tokio::join!(
            d.call("ssh_shell", json!({"session_id": s1.clone()})),
            d.call("ssh_shell", json!({"session_id": s1}))
        );

        assert_eq!(a["success"], true);
        assert_eq!(b["success"], true);
        assert_eq!(mock.shells_opened(), 2);
        assert_eq!(mock.shells_closed(), 1);
    }

    #[tokio::test]
    async fn test_transfers_and_listing() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("app.conf");
        let back = dir.path().join("app.conf.bak");
        tokio::fs::write(&local, b"port=80\n").await.unwrap();
        let d = dispatcher(&MockConnector::new(), settings());
        connect(&d, "A", "a.example").await;

        let up = d
            .call(
                "ssh_upload",
                json!({
                    "connection": "A",
                    "local_path": local.display().to_string(),
                    "remote_path": "/etc/app.conf",
                }),
            )
            .await;
        let down = d
            .call(
                "ssh_download",
                json!({
                    "connection": "A",
                    "remote_path": "/etc/app.conf",
                    "local_path": back.display().to_string(),
                }),
            )
            .await;
        let listed = d.call("ssh_list", json!({"connection": "Z"})).await;

        assert_eq!(up["success"], true);
        assert_eq!(up["bytes"], 8);
        assert_eq!(down["direction"], "download");
        assert_eq!(tokio::fs::read(&back).await.unwrap(), b"port=80\n");
        assert_eq!(listed["path"], ".");
        assert_eq!(listed["kind"], "not_found");
    }

    #[tokio::test]
    async fn test_shutdown_closes_connections() {
        let mock = MockConnector::new();
        let d = dispatcher(&mock, settings());
        connect(&d, "A", "a.example").await;
        connect(&d, "B", "b.example").await;

        d.shutdown().await;
        let listed = d.call("ssh_list_connections", json!({})).await;

        assert_eq!(listed["count"], 0);
        assert_eq!(mock.close_count(), 2);
    }
}
