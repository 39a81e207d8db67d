//! OS signal handling.
//!
//! SIGINT and SIGTERM both start a graceful shutdown: the broadcast wakes
//! the servers and the health monitor, and the client's cancellation token
//! aborts any retry that is sleeping.

use std::sync::Arc;

use crate::lifecycle::Shutdown;
use crate::upstream::StatsClient;

/// Resolves on the first SIGINT or SIGTERM.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
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
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}

/// Spawn a task that turns the first signal into a shutdown.
pub fn spawn_signal_handler(shutdown: Arc<Shutdown>, client: Arc<StatsClient>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("Shutdown signal received, draining");
        client.cancel();
        shutdown.trigger();
    })
}
