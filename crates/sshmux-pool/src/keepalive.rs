//! Periodic background sweep with explicit cancellation.

use std::{future::Future, time::Duration};

use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Handle to a running sweep task.
///
/// Dropping the handle cancels the task without waiting for it.
pub struct KeepaliveScheduler {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl KeepaliveScheduler {
    /// Run `sweep` every `interval`, starting one interval from now.
    ///
    /// The task ends when cancelled or when `sweep` returns `false`.
    /// Cancellation is observed between sweeps and while one is running.
    #[must_use]
    pub fn spawn<F, Fut>(interval: Duration, mut sweep: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let token = CancellationToken::new();
        let cancelled = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = cancelled.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let keep_going = tokio::select! {
                    () = cancelled.cancelled() => false,
                    keep_going = sweep() => keep_going,
                };
                if !keep_going {
                    break;
                }
            }
            debug!("Keep-alive task stopped");
        });

        Self {
            token,
            handle: Some(handle),
        }
    }

    /// Whether the task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Signal the task to stop without waiting.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Cancel and wait up to `grace` for the task to exit.
    pub async fn stop(mut self, grace: Duration) {
        self.token.cancel();
        let Some(handle) = self.handle.take() else {
            return;
        };
        match tokio::time::timeout(grace, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Keep-alive task panicked"),
            Err(_) => warn!(?grace, "Keep-alive task did not stop in time"),
        }
    }
}

impl Drop for KeepaliveScheduler {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
