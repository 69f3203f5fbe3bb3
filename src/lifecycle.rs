use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Handle for stopping a background loop.
///
/// Stopping is idempotent: only the first call to [`shutdown`](Self::shutdown)
/// signals the loop, later calls are no-ops.
#[derive(Clone, Debug, Default)]
pub struct ShutdownHandle {
    token: CancellationToken,
    requested: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal the loop to stop. Returns `true` only for the call that
    /// actually initiated shutdown.
    pub fn shutdown(&self) -> bool {
        if self.requested.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.token.cancel();
        true
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once shutdown has been requested
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }
}

/// A spawned background loop together with the handle that stops it
pub struct BackgroundTask {
    name: &'static str,
    shutdown_handle: ShutdownHandle,
    join_handle: JoinHandle<()>,
}

impl BackgroundTask {
    pub fn spawn<F>(name: &'static str, shutdown_handle: ShutdownHandle, future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let join_handle = tokio::spawn(future);
        tracing::info!(task = %name, "Background task started");

        Self {
            name,
            shutdown_handle,
            join_handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown_handle.clone()
    }

    /// Signal the loop and wait up to `timeout` for it to finish.
    ///
    /// Returns `true` if the task exited cleanly within the timeout.
    pub async fn stop(self, timeout: Duration) -> bool {
        self.shutdown_handle.shutdown();

        match tokio::time::timeout(timeout, self.join_handle).await {
            Ok(Ok(())) => {
                tracing::info!(task = %self.name, "Background task stopped gracefully");
                true
            }
            Ok(Err(e)) => {
                tracing::error!(
                    task = %self.name,
                    error = %e,
                    "Background task panicked during shutdown"
                );
                false
            }
            Err(_) => {
                tracing::error!(
                    task = %self.name,
                    timeout_secs = %timeout.as_secs(),
                    "Background task shutdown timed out"
                );
                false
            }
        }
    }
}
