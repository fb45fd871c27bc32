//! Shutdown sequencing.
//!
//! One [`ShutdownController`] owns the shutdown state machine: accepting,
//! then draining once [`ShutdownController::begin`] fires, then done when
//! the server tasks finish or the drain window closes. Listeners and
//! background tasks each hold a [`ShutdownSignal`] view of that state and
//! stop accepting the moment it flips.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// How long in-flight requests may run after shutdown begins.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Owner of the shutdown state. Dropping it counts as shutdown, so tasks
/// orphaned by an early exit wind down instead of hanging.
pub struct ShutdownController {
    state: watch::Sender<bool>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self { state }
    }

    /// Mint a view of the shutdown state for one listener or task.
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            state: self.state.subscribe(),
        }
    }

    /// Flip into draining. Idempotent; listeners observe it and stop
    /// accepting new connections.
    pub fn begin(&self) {
        let _ = self.state.send(true);
    }

    /// Begin shutdown and wait for the server tasks under one shared
    /// [`DRAIN_TIMEOUT`] window. Tasks still running when the window
    /// closes are abandoned to process exit.
    pub async fn drain(self, tasks: Vec<JoinHandle<()>>) {
        self.begin();
        let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
        for task in tasks {
            if tokio::time::timeout_at(deadline, task).await.is_err() {
                tracing::warn!("drain window elapsed with tasks still running");
                return;
            }
        }
    }
}

/// Cloneable view of the shutdown state held by listeners.
#[derive(Clone)]
pub struct ShutdownSignal {
    state: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolve once shutdown has begun, immediately if it already has.
    pub async fn triggered(&mut self) {
        while !*self.state.borrow() {
            if self.state.changed().await.is_err() {
                // Controller gone; treat as shutdown.
                return;
            }
        }
    }
}

/// Resolve when the process receives SIGINT or SIGTERM.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
