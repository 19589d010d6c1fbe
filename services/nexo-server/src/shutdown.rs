//! C13: graceful shutdown signaling.

use tokio::signal;
use tokio::sync::broadcast;

/// Resolves once ctrl-c or SIGTERM arrives.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

/// Creates the broadcast channel used to fan shutdown out to sweepers and
/// per-connection tasks. Receivers are cheap to clone via `tx.subscribe()`.
pub fn shutdown_channel() -> (broadcast::Sender<()>, broadcast::Receiver<()>) {
    broadcast::channel(1)
}
