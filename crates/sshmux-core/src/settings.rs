//! Runtime settings.
//!
//! Defaults, then `SSHMUX_*` environment variables, then an optional JSON
//! file. Settings are read-only: nothing here writes back to disk.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ConnectionConfig, error::ConfigError};

/// Environment variable naming an explicit settings file.
pub const CONFIG_PATH_ENV: &str = "SSHMUX_CONFIG";

/// File looked up in the home directory when `SSHMUX_CONFIG` is unset.
pub const DEFAULT_CONFIG_FILE: &str = ".sshmux.json";

/// How a newly opened shell is attached to sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShellBindingPolicy {
    /// One shell per session; only the requesting session is bound.
    #[default]
    PerSession,
    /// One shell per connection, bound to every session that references it.
    FanOut,
}

impl FromStr for ShellBindingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "per_session" => Ok(Self::PerSession),
            "fan_out" | "fanout" => Ok(Self::FanOut),
            other => Err(other.to_string()),
        }
    }
}

/// Bounds for reading interactive shell output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellReadLimits {
    /// Output is considered complete after this long without new data.
    pub idle_ms: u64,
    /// Hard cap on the whole read, including the wait for the first byte.
    pub max_wait_secs: u64,
    /// Hard cap on collected output.
    pub max_output_bytes: usize,
}

impl Default for ShellReadLimits {
    fn default() -> Self {
        Self {
            idle_ms: 200,
            max_wait_secs: 30,
            max_output_bytes: 1024 * 1024,
        }
    }
}

impl ShellReadLimits {
    #[must_use]
    pub const fn idle(&self) -> Duration {
        Duration::from_millis(self.idle_ms)
    }

    #[must_use]
    pub const fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

/// Tunables for the registries and the keep-alive task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Default command timeout in seconds.
    pub default_timeout_secs: u64,
    /// Interval between keep-alive sweeps.
    pub keepalive_interval_secs: u64,
    /// Timeout for one keep-alive probe.
    pub keepalive_timeout_secs: u64,
    /// Connection cap; `0` disables it.
    pub max_connections: usize,
    /// Session cap; `0` disables it.
    pub max_sessions: usize,
    /// Default `max_inactive_hours` for `session_cleanup` calls that omit it.
    pub session_cleanup_hours: u64,
    /// Shell output read bounds.
    pub shell: ShellReadLimits,
    /// Shell-to-session binding policy.
    pub shell_binding: ShellBindingPolicy,
    /// Refuse `session_create` for names not in the connection registry.
    pub require_connection_for_sessions: bool,
    /// `tracing_subscriber::EnvFilter` directive.
    pub log_filter: String,
    /// Named connection presets.
    pub connections: BTreeMap<String, ConnectionConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_timeout_secs: 30,
            keepalive_interval_secs: 60,
            keepalive_timeout_secs: 5,
            max_connections: 32,
            max_sessions: 100,
            session_cleanup_hours: 24,
            shell: ShellReadLimits::default(),
            shell_binding: ShellBindingPolicy::default(),
            require_connection_for_sessions: true,
            log_filter: "info".to_string(),
            connections: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Defaults overridden by `SSHMUX_*` environment variables.
    ///
    /// # Errors
    /// Returns error if a variable is set to an unparsable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Settings::from_env`] with a custom variable source.
    ///
    /// # Errors
    /// Returns error if a variable is set to an unparsable value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();
        let env = EnvReader { lookup: &lookup };

        env.apply("SSHMUX_TIMEOUT", &mut settings.default_timeout_secs)?;
        env.apply("SSHMUX_KEEPALIVE", &mut settings.keepalive_interval_secs)?;
        env.apply(
            "SSHMUX_KEEPALIVE_TIMEOUT",
            &mut settings.keepalive_timeout_secs,
        )?;
        env.apply("SSHMUX_MAX_CONNECTIONS", &mut settings.max_connections)?;
        env.apply("SSHMUX_MAX_SESSIONS", &mut settings.max_sessions)?;
        env.apply("SSHMUX_CLEANUP_HOURS", &mut settings.session_cleanup_hours)?;
        env.apply("SSHMUX_SHELL_IDLE_MS", &mut settings.shell.idle_ms)?;
        env.apply("SSHMUX_SHELL_MAX_WAIT", &mut settings.shell.max_wait_secs)?;
        env.apply("SSHMUX_SHELL_MAX_BYTES", &mut settings.shell.max_output_bytes)?;
        env.apply("SSHMUX_SHELL_BINDING", &mut settings.shell_binding)?;
        env.apply(
            "SSHMUX_REQUIRE_CONNECTION",
            &mut settings.require_connection_for_sessions,
        )?;
        if let Some(filter) = lookup("SSHMUX_LOG") {
            settings.log_filter = filter;
        }

        Ok(settings)
    }

    /// Environment settings overridden by the keys present in a JSON file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed, or the
    /// environment holds an invalid value.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let base = Self::from_env()?;
        Self::merge_file(base, path.as_ref())
    }

    /// Settings from `SSHMUX_CONFIG`, else `~/.sshmux.json` if it exists,
    /// else the environment alone.
    ///
    /// # Errors
    /// Returns error if the chosen file or the environment is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|home| home.join(DEFAULT_CONFIG_FILE)));

        match path {
            Some(path) if path.is_file() => {
                tracing::debug!(path = %path.display(), "Loading settings file");
                Self::from_file(path)
            }
            _ => Self::from_env(),
        }
    }

    fn merge_file(base: Self, path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let parse_err = |source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        };
        let overrides: Value = serde_json::from_str(&raw).map_err(parse_err)?;
        let mut merged = serde_json::to_value(base).map_err(parse_err)?;
        merge_json(&mut merged, overrides);
        serde_json::from_value(merged).map_err(parse_err)
    }

    /// Default command timeout.
    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    #[must_use]
    pub const fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    #[must_use]
    pub const fn keepalive_timeout(&self) -> Duration {
        Duration::from_secs(self.keepalive_timeout_secs)
    }

    /// Connection cap, `None` when unlimited.
    #[must_use]
    pub const fn connection_limit(&self) -> Option<usize> {
        if self.max_connections == 0 {
            None
        } else {
            Some(self.max_connections)
        }
    }

    /// Session cap, `None` when unlimited.
    #[must_use]
    pub const fn session_limit(&self) -> Option<usize> {
        if self.max_sessions == 0 {
            None
        } else {
            Some(self.max_sessions)
        }
    }
}

struct EnvReader<'a, F> {
    lookup: &'a F,
}

impl<F> EnvReader<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn apply<T: FromStr>(&self, key: &'static str, slot: &mut T) -> Result<(), ConfigError> {
        if let Some(raw) = (self.lookup)(key) {
            *slot = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue { key, value: raw })?;
        }
        Ok(())
    }
}

/// Recursively overlay `overrides` onto `base`; objects merge, anything else replaces.
fn merge_json(base: &mut Value, overrides: Value) {
    match (base, overrides) {
        (Value::Object(base), Value::Object(overrides)) => {
            for (key, value) in overrides {
                match base.get_mut(&key) {
                    Some(slot) => merge_json(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
