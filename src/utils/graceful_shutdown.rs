use std::time::Duration;

use eyre::{Result, WrapErr};
use tokio::{signal, time::timeout};
use tokio_util::sync::CancellationToken;

/// Represents different shutdown reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT / Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
    /// Requested from inside the process
    Manual,
}

/// Turns OS signals into cancellation of a shared [`CancellationToken`].
///
/// Background tasks (the registry refresh loop) and the HTTP server all watch
/// child tokens of the same root, so one signal stops everything.
pub struct GracefulShutdown {
    token: CancellationToken,
    /// Maximum time to wait for in-flight work after cancellation
    shutdown_timeout: Duration,
}

impl GracefulShutdown {
    /// Create a new GracefulShutdown manager with default 30-second timeout
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(shutdown_timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            shutdown_timeout,
        }
    }

    /// A child token cancelled together with this manager.
    pub fn token(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Manually trigger shutdown.
    pub fn trigger_shutdown(&self, reason: ShutdownReason) {
        if !self.token.is_cancelled() {
            tracing::info!("Shutdown triggered: {:?}", reason);
            self.token.cancel();
        }
    }

    /// Wait for SIGINT or SIGTERM (or a manual trigger) and cancel the token.
    pub async fn run_signal_handler(&self) -> Result<()> {
        tracing::info!("Signal handler started. Listening for SIGTERM and SIGINT");

        #[cfg(unix)]
        let mut sigterm = {
            use tokio::signal::unix::{SignalKind, signal};
            signal(SignalKind::terminate()).wrap_err("Failed to register SIGTERM handler")?
        };

        #[cfg(unix)]
        let terminate = sigterm.recv();
        #[cfg(not(unix))]
        let terminate = std::future::pending::<Option<()>>();

        tokio::select! {
            result = signal::ctrl_c() => {
                result.wrap_err("Failed to listen for Ctrl+C")?;
                tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
                self.trigger_shutdown(ShutdownReason::Interrupt);
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown...");
                self.trigger_shutdown(ShutdownReason::Terminate);
            }
            _ = self.token.cancelled() => {}
        }

        Ok(())
    }

    /// Wait for a spawned task to finish, giving up after the shutdown timeout.
    pub async fn drain<T>(&self, name: &str, task: tokio::task::JoinHandle<T>) {
        match timeout(self.shutdown_timeout, task).await {
            Ok(Ok(_)) => tracing::debug!("{} stopped", name),
            Ok(Err(e)) => tracing::warn!("{} ended abnormally: {}", name, e),
            Err(_) => tracing::error!(
                "{} did not stop within {:?}, abandoning it",
                name,
                self.shutdown_timeout
            ),
        }
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}
