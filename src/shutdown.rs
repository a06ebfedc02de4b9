//! Process-wide stop signal.
//!
//! A [`ShutdownCoordinator`] wraps a cancellation token. The sampler watches
//! a clone of it at each tick boundary; the persister never sees it directly
//! and instead stops at end-of-stream, after everything queued is written.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token to hand to a loop that must observe the stop request
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Request a stop; idempotent
    pub fn trigger(&self) {
        if !self.token.is_cancelled() {
            info!("Shutdown requested");
        }
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn triggered(&self) {
        self.token.cancelled().await
    }

    /// Spawn a task that triggers shutdown on SIGINT or SIGTERM
    pub fn listen_for_signals(&self) -> tokio::task::JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                signal = wait_for_signal() => {
                    match signal {
                        Ok(name) => info!(signal = name, "Received shutdown signal"),
                        Err(e) => warn!(error = %e, "Signal handler failed, shutting down"),
                    }
                    coordinator.trigger();
                }
                _ = coordinator.triggered() => {}
            }
        })
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.map(|_| "SIGINT"),
        _ = term.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|_| "ctrl-c")
}
