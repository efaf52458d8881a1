//! Graceful shutdown: stop accepting work, then let running generations
//! finish within a deadline.

use std::time::Duration;

use parley_runtime::Orchestrator;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default drain deadline.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared shutdown signal for the listener and background tasks.
#[derive(Clone, Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Coordinator that has not fired yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token observed by the listener, the subscriber bridge and the
    /// cancellation learner.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Fire the signal.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether the signal fired.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fire the signal, then wait up to `timeout` for the orchestrator's
    /// generations and the given background tasks.
    ///
    /// Returns `false` when the deadline passed first.
    pub async fn graceful_shutdown(
        &self,
        orchestrator: &Orchestrator,
        handles: Vec<JoinHandle<()>>,
        timeout: Option<Duration>,
    ) -> bool {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        self.shutdown();
        info!(
            generations = orchestrator.pending(),
            tasks = handles.len(),
            timeout_secs = timeout.as_secs(),
            "draining"
        );

        let drain = async {
            orchestrator.idle().await;
            let _ = futures::future::join_all(handles).await;
        };
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!(remaining = orchestrator.pending(), "shutdown timed out after {timeout:?}");
            return false;
        }
        info!("drained");
        true
    }
}

/// Resolve on Ctrl+C, or SIGTERM on unix.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                let _ = signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("ctrl-c received"),
        () = terminate => info!("SIGTERM received"),
    }
}
