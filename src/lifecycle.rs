use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{error, info};

use crate::notify::{Notifier, OutboundMessage};

/// Single-use guard around the exit notification. Both termination paths
/// (signal and escaped loop error) funnel through `notify_once`, and only
/// the first caller sends anything. The notification itself runs in normal
/// control flow, never inside a signal handler.
#[derive(Debug, Default)]
pub struct ExitGuard {
    fired: AtomicBool,
}

impl ExitGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt the exit notification if it has not been attempted yet.
    /// Returns whether this call made the attempt. Delivery failures are
    /// logged and never block termination.
    pub fn notify_once<N: Notifier>(&self, notifier: &N) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }

        match notifier.send(&OutboundMessage::agent_stopped()) {
            Ok(()) => info!("exit notification sent"),
            Err(err) => error!(error = %err, "exit notification failed"),
        }
        true
    }
}

/// Resolves when the process receives Ctrl+C or, on unix, SIGTERM. The
/// handler side only completes this future; all I/O happens in the caller.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            sigterm.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
