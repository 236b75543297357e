//! OS signal handling.
//!
//! SIGINT and SIGTERM start a graceful shutdown. They are the only external
//! shutdown triggers.

use tokio::signal;
use tokio::task::JoinHandle;

use crate::lifecycle::Shutdown;

/// Wait for an interrupt or terminate signal and return its name.
pub async fn termination_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => "interrupt",
        () = terminate => "terminate",
    }
}

/// Spawn a task that triggers `shutdown` on the first termination signal.
pub fn spawn_signal_listener(shutdown: Shutdown) -> JoinHandle<()> {
    tokio::spawn(async move {
        let signal = termination_signal().await;
        tracing::info!(signal, "Shutting down server");
        shutdown.trigger();
    })
}
