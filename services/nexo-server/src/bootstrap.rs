//! Wires the broker crate, the C2 TCP multiplexer, C9 sweepers, and the C8
//! HTTP snapshot API together into a running server. `main.rs` is a thin
//! wrapper around [`spawn`]; integration tests call [`spawn`] directly so
//! they can bind ephemeral ports and drive the real stack end-to-end.

use std::net::SocketAddr;
use std::sync::Arc;

use nexo_core::{
    spawn_kv_ttl_sweeper, spawn_queue_delay_sweeper, spawn_queue_ttl_sweeper, spawn_queue_visibility_sweeper,
    spawn_stream_retention_sweeper,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::dispatch::Brokers;
use crate::http::{build_router, AppState};
use crate::listener::accept_loop;
use crate::registry::ConnectionRegistry;
use crate::shutdown::shutdown_channel;

/// A server instance bound and running in the background. Dropping this
/// does not stop the server -- call [`RunningServer::shutdown`] and await
/// the returned handles, the way `main.rs` does with its own shutdown
/// signal.
pub struct RunningServer {
    pub tcp_addr: SocketAddr,
    pub dashboard_addr: SocketAddr,
    pub brokers: Arc<Brokers>,
    shutdown_tx: broadcast::Sender<()>,
    accept_task: JoinHandle<()>,
    http_task: JoinHandle<()>,
}

impl RunningServer {
    /// Signals every background task (accept loop, sweepers, HTTP server)
    /// to stop, and waits for the TCP accept loop and HTTP server to
    /// finish. Sweepers are fire-and-forget; their exit is observed only
    /// through the shutdown signal, matching `main.rs`.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.accept_task.await;
        let _ = self.http_task.await;
    }
}

/// Binds both listeners from `config` and spawns every background task:
/// the five C9 sweepers, the C2 accept loop, and the C8 HTTP router.
/// `config.tcp_addr`/`dashboard_addr` of `"host:0"` bind an ephemeral port,
/// which the returned [`RunningServer`] reports back -- used by tests that
/// need a live address without colliding on a fixed port.
pub async fn spawn(config: ServerConfig) -> RunningServer {
    let brokers = Arc::new(Brokers::new());
    let registry = Arc::new(ConnectionRegistry::new());
    let (shutdown_tx, _) = shutdown_channel();

    spawn_kv_ttl_sweeper(brokers.kv.clone(), config.sweep, shutdown_tx.subscribe());
    spawn_queue_visibility_sweeper(brokers.queue.clone(), config.sweep, shutdown_tx.subscribe());
    spawn_queue_delay_sweeper(brokers.queue.clone(), config.sweep, shutdown_tx.subscribe());
    spawn_queue_ttl_sweeper(brokers.queue.clone(), config.sweep, shutdown_tx.subscribe());
    spawn_stream_retention_sweeper(brokers.stream.clone(), config.sweep, shutdown_tx.subscribe());

    let tcp_listener = TcpListener::bind(&config.tcp_addr).await.expect("failed to bind tcp listener");
    let tcp_addr = tcp_listener.local_addr().expect("bound tcp listener has a local addr");
    tracing::info!(addr = %tcp_addr, "tcp listener bound");

    let http_listener = TcpListener::bind(&config.dashboard_addr).await.expect("failed to bind http listener");
    let dashboard_addr = http_listener.local_addr().expect("bound http listener has a local addr");
    tracing::info!(addr = %dashboard_addr, "http listener bound");

    let router = build_router(AppState { brokers: brokers.clone() });
    let mut http_shutdown_rx = shutdown_tx.subscribe();
    let http_task = tokio::spawn(async move {
        axum::serve(http_listener, router)
            .with_graceful_shutdown(async move {
                let _ = http_shutdown_rx.recv().await;
            })
            .await
            .expect("http server error");
    });

    let accept_task = tokio::spawn(accept_loop(
        tcp_listener,
        brokers.clone(),
        registry,
        config.max_payload_len,
        config.writer_queue_capacity,
        shutdown_tx.clone(),
    ));

    RunningServer { tcp_addr, dashboard_addr, brokers, shutdown_tx, accept_task, http_task }
}
