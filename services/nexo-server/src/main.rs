use nexo_server::bootstrap;
use nexo_server::config::{log_level, ServerConfig};
use nexo_server::shutdown::shutdown_signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(log_level())).init();

    let config = ServerConfig::from_env();
    let server = bootstrap::spawn(config).await;
    info!(tcp_addr = %server.tcp_addr, dashboard_addr = %server.dashboard_addr, "nexo listening");

    shutdown_signal().await;
    info!("shutdown signal received");
    server.shutdown().await;
    info!("server shut down gracefully");
}
