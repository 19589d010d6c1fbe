//! Tracks live connections so the PubSub broker's subscriber conn-ids can be
//! turned back into an [`OutboundQueue`] to push to.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use nexo_core::ConnId;
use tokio::sync::RwLock;

use crate::outbound::OutboundQueue;

pub struct ConnectionRegistry {
    next_id: AtomicU64,
    connections: RwLock<HashMap<ConnId, Arc<OutboundQueue>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self { next_id: AtomicU64::new(1), connections: RwLock::new(HashMap::new()) }
    }

    /// Allocates a fresh connection id and registers its outbound queue.
    pub async fn register(&self, queue: Arc<OutboundQueue>) -> ConnId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.connections.write().await.insert(id, queue);
        id
    }

    pub async fn deregister(&self, conn_id: ConnId) {
        if let Some(queue) = self.connections.write().await.remove(&conn_id) {
            queue.close();
        }
    }

    pub async fn get(&self, conn_id: ConnId) -> Option<Arc<OutboundQueue>> {
        self.connections.read().await.get(&conn_id).cloned()
    }

    /// Delivers `frame` to each listed connection, dropping it for
    /// subscribers whose queue is saturated and silently skipping ids that
    /// have already disconnected.
    pub async fn push_lossy(&self, conn_ids: &[ConnId], frame: &[u8]) {
        let connections = self.connections.read().await;
        for conn_id in conn_ids {
            if let Some(queue) = connections.get(conn_id) {
                queue.send_lossy(frame.to_vec());
            }
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
