//! KV broker (C4): a hash map with lazy + proactive TTL expiration.
//!
//! `ttl_secs == 0` means "never expire". A key whose `expires_at` is
//! observed `<= now` is logically absent on read even before the sweeper
//! has gotten around to removing it.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use nexo_protocol::AnyValue;
use tokio::sync::RwLock;

use crate::snapshot::{render_any, StoreKeyView, StoreSnapshot};

#[derive(Debug, Clone)]
struct KvEntry {
    value: AnyValue,
    expires_at: Option<Instant>,
}

impl KvEntry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(t) if t <= now)
    }
}

#[derive(Default)]
pub struct KvBroker {
    map: RwLock<HashMap<String, KvEntry>>,
}

impl KvBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert. `ttl_secs = 0` means the entry never expires.
    pub async fn set(&self, key: String, ttl_secs: u64, value: AnyValue) {
        let expires_at = (ttl_secs > 0).then(|| Instant::now() + Duration::from_secs(ttl_secs));
        self.map.write().await.insert(key, KvEntry { value, expires_at });
    }

    /// `None` for a missing or lazily-expired key.
    pub async fn get(&self, key: &str) -> Option<AnyValue> {
        let map = self.map.read().await;
        let entry = map.get(key)?;
        if entry.is_expired(Instant::now()) {
            None
        } else {
            Some(entry.value.clone())
        }
    }

    /// Idempotent: returns whether a live entry was actually removed.
    pub async fn del(&self, key: &str) -> bool {
        let mut map = self.map.write().await;
        match map.remove(key) {
            Some(entry) => !entry.is_expired(Instant::now()),
            None => false,
        }
    }

    /// C9 proactive sweep: remove up to `batch` expired entries. Returns
    /// the number actually removed, so the caller can log sweep pressure.
    pub async fn sweep_expired(&self, batch: usize) -> usize {
        let now = Instant::now();
        let mut map = self.map.write().await;
        let expired: Vec<String> = map
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .take(batch)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            map.remove(key);
        }
        expired.len()
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        let now = Instant::now();
        let map = self.map.read().await;
        let keys = map
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, entry)| StoreKeyView {
                key: key.clone(),
                value: render_any(&entry.value),
                expires_at: entry.expires_at.map(|_| "ttl-bound".to_owned()),
            })
            .collect();
        StoreSnapshot { keys }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexo_protocol::AnyValue;
    use tokio::time::{advance, pause};

    #[tokio::test]
    async fn set_and_get_roundtrip() {
        let kv = KvBroker::new();
        kv.set("k".into(), 0, AnyValue::String("v".into())).await;
        assert_eq!(kv.get("k").await, Some(AnyValue::String("v".into())));
    }

    #[tokio::test]
    async fn missing_key_returns_none() {
        let kv = KvBroker::new();
        assert_eq!(kv.get("missing").await, None);
    }

    #[tokio::test]
    async fn del_is_idempotent() {
        let kv = KvBroker::new();
        kv.set("k".into(), 0, AnyValue::Raw(vec![1])).await;
        assert!(kv.del("k").await);
        assert!(!kv.del("k").await);
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_expiry_is_observed_lazily_on_read() {
        pause();
        let kv = KvBroker::new();
        kv.set("k".into(), 1, AnyValue::String("v".into())).await;
        assert_eq!(kv.get("k").await, Some(AnyValue::String("v".into())));

        advance(Duration::from_millis(1200)).await;
        assert_eq!(kv.get("k").await, None);
    }

    #[tokio::test]
    async fn ttl_zero_means_never_expires() {
        let kv = KvBroker::new();
        kv.set("k".into(), 0, AnyValue::String("v".into())).await;
        // sweeping shouldn't touch a TTL-less entry no matter how large the batch.
        assert_eq!(kv.sweep_expired(1000).await, 0);
        assert_eq!(kv.get("k").await, Some(AnyValue::String("v".into())));
    }

    #[tokio::test]
    async fn empty_string_value_is_distinct_from_absence() {
        let kv = KvBroker::new();
        kv.set("e".into(), 0, AnyValue::String(String::new())).await;
        assert_eq!(kv.get("e").await, Some(AnyValue::String(String::new())));
        assert_eq!(kv.get("never-set").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_removes_bounded_batch_of_expired_entries() {
        pause();
        let kv = KvBroker::new();
        for i in 0..10 {
            kv.set(format!("k{i}"), 1, AnyValue::Raw(vec![])).await;
        }
        advance(Duration::from_millis(1200)).await;
        let removed_first = kv.sweep_expired(4).await;
        assert_eq!(removed_first, 4);
        let removed_second = kv.sweep_expired(100).await;
        assert_eq!(removed_second, 6);
    }
}
