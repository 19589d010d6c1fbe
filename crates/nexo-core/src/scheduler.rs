//! C9 background sweepers: one cooperative loop per concern (KV TTL, Queue
//! visibility/delay/TTL, Stream retention), each spawned from `main` with
//! its own clone of the relevant broker `Arc` and cancelled via a shared
//! shutdown broadcast.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::kv::KvBroker;
use crate::queue::QueueBroker;
use crate::stream::StreamBroker;

#[derive(Debug, Clone, Copy)]
pub struct SweepConfig {
    pub cadence: Duration,
    pub batch: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self { cadence: Duration::from_secs(1), batch: 256 }
    }
}

pub fn spawn_kv_ttl_sweeper(kv: Arc<KvBroker>, config: SweepConfig, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(config.cadence) => {
                    let removed = kv.sweep_expired(config.batch).await;
                    if removed > 0 {
                        tracing::debug!(removed, "kv ttl sweep");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("kv ttl sweeper shutting down");
                    break;
                }
            }
        }
    })
}

pub fn spawn_queue_visibility_sweeper(
    queue: Arc<QueueBroker>,
    config: SweepConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(config.cadence) => {
                    for name in queue.names().await {
                        match queue.sweep_visibility(&name, config.batch).await {
                            Ok(n) if n > 0 => tracing::debug!(queue = %name, redelivered_or_dead_lettered = n, "queue visibility sweep"),
                            Ok(_) => {}
                            Err(err) => tracing::warn!(queue = %name, %err, "visibility sweep failed"),
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("queue visibility sweeper shutting down");
                    break;
                }
            }
        }
    })
}

pub fn spawn_queue_delay_sweeper(
    queue: Arc<QueueBroker>,
    config: SweepConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(config.cadence) => {
                    for name in queue.names().await {
                        match queue.sweep_delayed(&name, config.batch).await {
                            Ok(n) if n > 0 => tracing::debug!(queue = %name, moved_to_pending = n, "queue delay sweep"),
                            Ok(_) => {}
                            Err(err) => tracing::warn!(queue = %name, %err, "delay sweep failed"),
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("queue delay sweeper shutting down");
                    break;
                }
            }
        }
    })
}

pub fn spawn_queue_ttl_sweeper(
    queue: Arc<QueueBroker>,
    config: SweepConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(config.cadence) => {
                    for name in queue.names().await {
                        match queue.sweep_ttl(&name, config.batch).await {
                            Ok(n) if n > 0 => tracing::debug!(queue = %name, expired = n, "queue ttl sweep"),
                            Ok(_) => {}
                            Err(err) => tracing::warn!(queue = %name, %err, "ttl sweep failed"),
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("queue ttl sweeper shutting down");
                    break;
                }
            }
        }
    })
}

pub fn spawn_stream_retention_sweeper(
    stream: Arc<StreamBroker>,
    config: SweepConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(config.cadence) => {
                    for name in stream.names().await {
                        match stream.sweep_retention(&name).await {
                            Ok(n) if n > 0 => tracing::debug!(topic = %name, dropped = n, "stream retention sweep"),
                            Ok(_) => {}
                            Err(err) => tracing::warn!(topic = %name, %err, "retention sweep failed"),
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("stream retention sweeper shutting down");
                    break;
                }
            }
        }
    })
}
