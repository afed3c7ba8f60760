//! Graceful shutdown: signal handling. The bounded drain wait itself
//! lives in `main.rs`, around the `axum_server` serve task.

use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Handles graceful shutdown on SIGTERM and SIGINT.
///
/// Spawns a background task that listens for shutdown signals and
/// triggers a cancellation token when received.
pub struct Shutdown {
    _task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl Shutdown {
    /// Creates a new signal handler. Returns an error if signal
    /// registration fails (e.g. no unix signal support).
    pub fn try_new() -> Result<Self, std::io::Error> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let inner = CancellationToken::new();
        let outer = inner.clone();
        let task_tracker = TaskTracker::new();
        task_tracker.spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("received SIGTERM");
                    inner.cancel();
                }
                _ = sigint.recv() => {
                    tracing::info!("received SIGINT");
                    inner.cancel();
                }
            }
        });
        task_tracker.close();
        Ok(Self {
            _task_tracker: task_tracker,
            cancellation_token: outer,
        })
    }

    /// A token that signals shutdown; `main` awaits it, then calls
    /// `axum_server::Handle::graceful_shutdown` and bounds the
    /// subsequent drain itself.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }
}
