//! Name-keyed connection registry.
//!
//! The map lock only guards membership. Each operation clones the
//! connection handle out of the map and runs against it, so a slow
//! command on one connection never blocks another.

use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
    sync::{Arc, Mutex, PoisonError, Weak},
    time::Duration,
};

use futures::future::join_all;
use sshmux_core::{
    Ack, CommandOutcome, ConnectionConfig, Connector, ListingOutcome, Settings, ShellId,
    ShellOpened, ShellOutput, TransferDirection, TransferOutcome,
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{Connection, ConnectionInfo, KeepaliveScheduler, PoolError};

/// Longest `shutdown` waits for the keep-alive task to exit.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

struct Inner {
    connections: RwLock<HashMap<String, Arc<Connection>>>,
    connector: Arc<dyn Connector>,
    settings: Settings,
    keepalive: Mutex<Option<KeepaliveScheduler>>,
}

impl Inner {
    /// Probe every connection concurrently.
    async fn sweep(&self) {
        let connections: Vec<_> = self.connections.read().await.values().cloned().collect();
        if connections.is_empty() {
            return;
        }
        let timeout = self.settings.keepalive_timeout();
        let results = join_all(connections.iter().map(|c| c.keep_alive(timeout))).await;
        let down = results.iter().filter(|alive| !**alive).count();
        debug!(probed = connections.len(), down, "Keep-alive sweep");
    }
}

/// Shared registry of named connections.
///
/// Cloning is cheap; clones share the same map.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<Inner>,
}

impl ConnectionRegistry {
    /// Create a registry with default settings.
    pub fn new(connector: impl Connector + 'static) -> Self {
        Self::with_settings(Arc::new(connector), Settings::default())
    }

    /// Create a registry with explicit settings.
    ///
    /// The keep-alive task starts with the first successful connection.
    #[must_use]
    pub fn with_settings(connector: Arc<dyn Connector>, settings: Settings) -> Self {
        Self {
            inner: Arc::new(Inner {
                connections: RwLock::new(HashMap::new()),
                connector,
                settings,
                keepalive: Mutex::new(None),
            }),
        }
    }

    /// Settings the registry was built with.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// Connect and register under `name`, replacing any existing entry.
    ///
    /// A replaced connection is disconnected first. The handshake runs
    /// outside the map lock. On failure nothing is registered.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Connect` if the transport cannot be established
    /// and `PoolError::LimitReached` if the connection cap is full.
    pub async fn add_connection(
        &self,
        name: impl Into<String>,
        config: ConnectionConfig,
    ) -> Result<(), PoolError> {
        let name = name.into();

        let previous = self.inner.connections.write().await.remove(&name);
        if let Some(previous) = previous {
            info!(connection = %name, "Replacing existing connection");
            previous.disconnect().await;
        }

        let limit = self.inner.settings.connection_limit();
        if let Some(max) = limit {
            if self.inner.connections.read().await.len() >= max {
                warn!(connection = %name, max, "Connection limit reached");
                return Err(PoolError::LimitReached { max });
            }
        }

        let connection = Arc::new(Connection::new(
            name.clone(),
            config,
            Arc::clone(&self.inner.connector),
        ));
        connection
            .connect()
            .await
            .map_err(|source| PoolError::Connect {
                name: name.clone(),
                source,
            })?;

        let inserted = {
            let mut connections = self.inner.connections.write().await;
            let full = limit.is_some_and(|max| {
                !connections.contains_key(&name) && connections.len() >= max
            });
            if full {
                None
            } else {
                Some(connections.insert(name.clone(), Arc::clone(&connection)))
            }
        };

        match inserted {
            None => {
                connection.disconnect().await;
                let max = limit.unwrap_or_default();
                warn!(connection = %name, max, "Connection limit reached");
                Err(PoolError::LimitReached { max })
            }
            Some(displaced) => {
                // A concurrent add for the same name won the race to the map.
                if let Some(displaced) = displaced {
                    displaced.disconnect().await;
                }
                self.ensure_keepalive();
                Ok(())
            }
        }
    }

    /// Disconnect and unregister. Unknown names are ignored.
    pub async fn remove_connection(&self, name: &str) {
        let removed = self.inner.connections.write().await.remove(name);
        match removed {
            Some(connection) => {
                connection.disconnect().await;
                info!(connection = %name, "Connection removed");
            }
            None => debug!(connection = %name, "Remove of unknown connection"),
        }
    }

    /// Shared handle to a registered connection. Holding it does not block
    /// the registry.
    pub async fn get_connection(&self, name: &str) -> Option<Arc<Connection>> {
        self.inner.connections.read().await.get(name).cloned()
    }

    /// Whether `name` is registered, connected or not.
    pub async fn contains(&self, name: &str) -> bool {
        self.inner.connections.read().await.contains_key(name)
    }

    /// Snapshot of every registered connection.
    pub async fn list_connections(&self) -> BTreeMap<String, ConnectionInfo> {
        self.inner
            .connections
            .read()
            .await
            .iter()
            .map(|(name, c)| (name.clone(), c.info()))
            .collect()
    }

    /// Run `command` on the named connection.
    ///
    /// `timeout` defaults to the configured command timeout.
    pub async fn execute_command(
        &self,
        name: &str,
        command: &str,
        timeout: Option<Duration>,
    ) -> CommandOutcome {
        let Some(connection) = self.get_connection(name).await else {
            return CommandOutcome::not_found(command);
        };
        let timeout = timeout.unwrap_or_else(|| self.inner.settings.default_timeout());
        connection.execute_command(command, timeout).await
    }

    /// Copy a local file to `remote` on the named connection.
    pub async fn upload_file(&self, name: &str, local: &Path, remote: &str) -> TransferOutcome {
        let Some(connection) = self.get_connection(name).await else {
            return TransferOutcome::not_found(
                TransferDirection::Upload,
                local.display().to_string(),
                remote,
            );
        };
        connection.upload_file(local, remote).await
    }

    /// Copy `remote` from the named connection to a local file.
    pub async fn download_file(&self, name: &str, remote: &str, local: &Path) -> TransferOutcome {
        let Some(connection) = self.get_connection(name).await else {
            return TransferOutcome::not_found(
                TransferDirection::Download,
                local.display().to_string(),
                remote,
            );
        };
        connection.download_file(remote, local).await
    }

    /// Long-format listing of `path` on the named connection.
    pub async fn list_directory(&self, name: &str, path: &str) -> ListingOutcome {
        let Some(connection) = self.get_connection(name).await else {
            return ListingOutcome::not_found(path);
        };
        connection
            .list_directory(path, self.inner.settings.default_timeout())
            .await
    }

    /// Open an interactive shell with terminal type `term`.
    pub async fn create_shell(&self, name: &str, term: &str) -> ShellOpened {
        let Some(connection) = self.get_connection(name).await else {
            return ShellOpened::not_found(term);
        };
        connection.create_shell(term).await
    }

    /// Send one line to `shell` and collect its output within the
    /// configured read limits.
    pub async fn send_shell_command(
        &self,
        name: &str,
        shell: ShellId,
        command: &str,
    ) -> ShellOutput {
        let Some(connection) = self.get_connection(name).await else {
            return ShellOutput::not_found(command);
        };
        connection
            .send_shell_command(shell, command, &self.inner.settings.shell)
            .await
    }

    /// Close `shell` on the named connection.
    ///
    /// Only an unknown connection name fails; an unknown shell id succeeds.
    pub async fn close_shell(&self, name: &str, shell: ShellId) -> Ack {
        let Some(connection) = self.get_connection(name).await else {
            return Ack::not_found();
        };
        connection.close_shell(shell).await
    }

    /// Whether `shell` is still open on the named connection.
    pub async fn has_shell(&self, name: &str, shell: ShellId) -> bool {
        match self.get_connection(name).await {
            Some(connection) => connection.has_shell(shell).await,
            None => false,
        }
    }

    /// Probe every connection once, outside the periodic schedule.
    pub async fn keep_alive_sweep(&self) {
        self.inner.sweep().await;
    }

    /// Whether the periodic keep-alive task is running.
    #[must_use]
    pub fn keepalive_running(&self) -> bool {
        self.inner
            .keepalive
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|k| !k.is_finished())
    }

    fn ensure_keepalive(&self) {
        let mut slot = self
            .inner
            .keepalive
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|k| !k.is_finished()) {
            return;
        }

        let interval = self.inner.settings.keepalive_interval();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        *slot = Some(KeepaliveScheduler::spawn(interval, move || {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(inner) => {
                        inner.sweep().await;
                        true
                    }
                    None => false,
                }
            }
        }));
        info!(interval_secs = interval.as_secs(), "Keep-alive task started");
    }

    /// Stop the keep-alive task and disconnect everything.
    ///
    /// Idempotent. Waits at most [`SHUTDOWN_GRACE`] for the task to exit.
    pub async fn shutdown(&self) {
        let scheduler = self
            .inner
            .keepalive
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(scheduler) = &scheduler {
            scheduler.cancel();
        }

        let drained: Vec<_> = self
            .inner
            .connections
            .write()
            .await
            .drain()
            .map(|(_, c)| c)
            .collect();
        let count = drained.len();
        join_all(drained.iter().map(|c| c.disconnect())).await;

        if let Some(scheduler) = scheduler {
            scheduler.stop(SHUTDOWN_GRACE).await;
        }
        info!(connections = count, "Connection registry shut down");
    }
}
