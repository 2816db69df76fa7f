//! Signal-driven shutdown coordination.
//!
//! One `GracefulShutdown` instance is created at startup and is the only
//! cancellation source in the process. Listener accept loops, the ticket
//! rotation timer, and the rate-limiter sweeper all observe tokens derived
//! from it; the drain deadline is enforced per listener.
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use eyre::Result;
use tokio::{signal, sync::broadcast};

/// Why the process is going down.
#[derive(Debug, Clone)]
pub enum ShutdownReason {
    /// SIGTERM / SIGINT or a manual trigger.
    Graceful,
    /// Drain deadline exceeded, listener force-closed.
    Force,
}

/// Broadcasts the termination signal to every long-running loop.
pub struct GracefulShutdown {
    shutdown_tx: broadcast::Sender<ShutdownReason>,
    shutdown_initiated: Arc<AtomicBool>,
    drain_deadline: Duration,
}

impl GracefulShutdown {
    /// Default 10-second drain deadline.
    pub fn new() -> Self {
        Self::with_deadline(Duration::from_secs(10))
    }

    pub fn with_deadline(drain_deadline: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx,
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            drain_deadline,
        }
    }

    /// Time budget each listener gets to finish in-flight requests.
    pub fn drain_deadline(&self) -> Duration {
        self.drain_deadline
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Relaxed)
    }

    /// Manually trigger shutdown (tests, admin-initiated stop).
    pub fn trigger_shutdown(&self, reason: ShutdownReason) -> Result<()> {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            tracing::info!("shutdown triggered: {:?}", reason);
            let _ = self.shutdown_tx.send(reason);
        }
        Ok(())
    }

    /// Block on OS termination signals and fan the first one out.
    pub async fn run_signal_handler(&self) -> Result<()> {
        tracing::info!("signal handler started, waiting for SIGINT/SIGTERM");

        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("interrupt signal");
            }
            _ = wait_for_sigterm() => {
                tracing::info!("terminate signal");
            }
        }

        self.trigger_shutdown(ShutdownReason::Graceful)?;
        Ok(())
    }

    /// Wait until a shutdown signal arrives.
    pub async fn wait_for_shutdown_signal(&self) -> ShutdownReason {
        let mut receiver = self.shutdown_tx.subscribe();
        match receiver.recv().await {
            Ok(reason) => reason,
            Err(_) => {
                tracing::warn!("shutdown channel closed unexpectedly");
                ShutdownReason::Force
            }
        }
    }

    /// Derive a token observable by a background loop.
    pub fn shutdown_token(&self) -> ShutdownToken {
        ShutdownToken {
            receiver: self.shutdown_tx.subscribe(),
            shutdown_initiated: self.shutdown_initiated.clone(),
        }
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!("cannot register SIGTERM handler: {e}");
            std::future::pending::<()>().await;
            return;
        }
    };
    sigterm.recv().await;
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    // Only Ctrl+C on non-Unix platforms.
    std::future::pending::<()>().await;
}

/// Cooperative cancellation handle held by background loops.
pub struct ShutdownToken {
    receiver: broadcast::Receiver<ShutdownReason>,
    shutdown_initiated: Arc<AtomicBool>,
}

impl Clone for ShutdownToken {
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.resubscribe(),
            shutdown_initiated: self.shutdown_initiated.clone(),
        }
    }
}

impl ShutdownToken {
    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Relaxed)
    }

    /// Wait for the signal. Also resolves immediately when the signal fired
    /// before this call.
    pub async fn wait_for_shutdown(&mut self) -> ShutdownReason {
        if self.is_shutdown_initiated() {
            return ShutdownReason::Graceful;
        }
        match self.receiver.recv().await {
            Ok(reason) => reason,
            Err(_) => ShutdownReason::Force,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_not_initiated_on_creation() {
        let shutdown = GracefulShutdown::new();
        assert!(!shutdown.is_shutdown_initiated());
        assert_eq!(shutdown.drain_deadline(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_manual_trigger_reaches_tokens() {
        let shutdown = GracefulShutdown::new();
        let mut token = shutdown.shutdown_token();

        shutdown.trigger_shutdown(ShutdownReason::Graceful).unwrap();
        assert!(shutdown.is_shutdown_initiated());
        assert!(token.is_shutdown_initiated());
        assert!(matches!(
            token.wait_for_shutdown().await,
            ShutdownReason::Graceful
        ));
    }

    #[tokio::test]
    async fn test_late_subscriber_still_observes_shutdown() {
        let shutdown = GracefulShutdown::new();
        shutdown.trigger_shutdown(ShutdownReason::Graceful).unwrap();

        // Token derived after the signal fired.
        let mut token = shutdown.shutdown_token();
        assert!(matches!(
            token.wait_for_shutdown().await,
            ShutdownReason::Graceful
        ));
    }

    #[tokio::test]
    async fn test_second_trigger_is_ignored() {
        let shutdown = GracefulShutdown::new();
        let mut receiver = shutdown.shutdown_tx.subscribe();
        shutdown.trigger_shutdown(ShutdownReason::Graceful).unwrap();
        shutdown.trigger_shutdown(ShutdownReason::Force).unwrap();

        assert!(matches!(
            receiver.recv().await.unwrap(),
            ShutdownReason::Graceful
        ));
        assert!(receiver.try_recv().is_err());
    }
}
