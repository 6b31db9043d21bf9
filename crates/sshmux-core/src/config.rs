//! Connection configuration records.

use std::{fmt, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

const fn default_port() -> u16 {
    22
}

const fn default_timeout_secs() -> u64 {
    30
}

/// Target endpoint for one named connection.
///
/// Deserializes from the same keys the `ssh_connect` tool takes, so a
/// caller's argument map can be turned into a config directly.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Remote host name or address.
    pub host: String,

    /// Remote port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Login user.
    pub username: String,

    /// Password authentication. Takes precedence over `key_filename`.
    /// Accepted on input, never written out.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// Private key file for public-key authentication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_filename: Option<PathBuf>,

    /// Passphrase for an encrypted `key_filename`. Never written out.
    #[serde(default, skip_serializing)]
    pub passphrase: Option<String>,

    /// Handshake timeout in seconds.
    #[serde(default = "default_timeout_secs", rename = "timeout")]
    pub timeout_secs: u64,
}

/// Credential resolved from a [`ConnectionConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credential<'a> {
    /// Password authentication.
    Password(&'a str),
    /// Private key file, optionally encrypted.
    KeyFile {
        path: &'a std::path::Path,
        passphrase: Option<&'a str>,
    },
    /// No credential supplied.
    None,
}

impl ConnectionConfig {
    /// Create a config with default port and timeout and no credential.
    #[must_use]
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            username: username.into(),
            password: None,
            key_filename: None,
            passphrase: None,
            timeout_secs: default_timeout_secs(),
        }
    }

    /// Set the port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Use password authentication.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Use a private key file.
    #[must_use]
    pub fn with_key_file(mut self, path: impl Into<PathBuf>, passphrase: Option<String>) -> Self {
        self.key_filename = Some(path.into());
        self.passphrase = passphrase;
        self
    }

    /// Set the handshake timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }

    /// Handshake timeout as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Resolve the credential to present.
    #[must_use]
    pub fn credential(&self) -> Credential<'_> {
        if let Some(password) = self.password.as_deref() {
            Credential::Password(password)
        } else if let Some(path) = self.key_filename.as_deref() {
            Credential::KeyFile {
                path,
                passphrase: self.passphrase.as_deref(),
            }
        } else {
            Credential::None
        }
    }

    /// `user@host:port`, for logs.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("key_filename", &self.key_filename)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_tool_arguments() {
        let cfg: ConnectionConfig = serde_json::from_value(serde_json::json!({
            "host": "db.internal",
            "username": "ops",
            "password": "hunter2",
        }))
        .unwrap();

        assert_eq!(cfg.port, 22);
        assert_eq!(cfg.timeout(), Duration::from_secs(30));
        assert_eq!(cfg.credential(), Credential::Password("hunter2"));
    }

    #[test]
    fn test_password_wins_over_key() {
        let cfg = ConnectionConfig::new("h", "u")
            .with_key_file("/keys/id_ed25519", None)
            .with_password("pw");
        assert_eq!(cfg.credential(), Credential::Password("pw"));

        let cfg = ConnectionConfig::new("h", "u").with_key_file("/keys/id_ed25519", None);
        assert!(matches!(cfg.credential(), Credential::KeyFile { .. }));
        assert_eq!(ConnectionConfig::new("h", "u").credential(), Credential::None);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let cfg = ConnectionConfig::new("h", "u")
            .with_key_file("/k", Some("topsecret".into()))
            .with_password("hunter2");
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("topsecret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_serialize_omits_secrets() {
        let cfg = ConnectionConfig::new("h", "u")
            .with_key_file("/k", Some("topsecret".into()))
            .with_password("hunter2");

        let value = serde_json::to_value(&cfg).unwrap();
        let rendered = value.to_string();

        assert!(value.get("password").is_none());
        assert!(value.get("passphrase").is_none());
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("topsecret"));
        assert_eq!(value["key_filename"], "/k");
    }
}
