//! Read-only JSON view types for the HTTP snapshot API (C8).
//!
//! These mirror the payload shapes documented for `/api/store`,
//! `/api/queue`, `/api/pubsub`, and `/api/stream`. Producing them never
//! mutates broker state beyond the brief lock needed to clone it.

use nexo_protocol::AnyValue;
use serde::Serialize;

pub fn render_any(value: &AnyValue) -> String {
    match value {
        AnyValue::String(s) => s.clone(),
        AnyValue::Raw(bytes) => format!("0x{}", hex::encode(bytes)),
        AnyValue::Json(bytes) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

#[derive(Debug, Serialize)]
pub struct StoreSnapshot {
    pub keys: Vec<StoreKeyView>,
}

#[derive(Debug, Serialize)]
pub struct StoreKeyView {
    pub key: String,
    pub value: String,
    pub expires_at: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QueueSnapshot {
    pub active_queues: Vec<QueueView>,
    pub dlq_queues: Vec<DlqQueueView>,
}

#[derive(Debug, Serialize)]
pub struct QueueView {
    pub name: String,
    pub pending: Vec<MessageView>,
    pub inflight: Vec<MessageView>,
    pub scheduled: Vec<MessageView>,
}

#[derive(Debug, Serialize)]
pub struct MessageView {
    pub id: String,
    pub payload: String,
    pub state: String,
    pub priority: u8,
    pub attempts: u32,
    pub next_delivery_at: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DlqQueueView {
    pub name: String,
    pub messages: Vec<DlqMessageView>,
}

#[derive(Debug, Serialize)]
pub struct DlqMessageView {
    pub id: String,
    pub payload: String,
    pub attempts: u32,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PubSubSnapshot {
    pub active_clients: usize,
    pub topics: Vec<TopicView>,
    pub wildcards: WildcardSnapshot,
}

#[derive(Debug, Serialize)]
pub struct TopicView {
    pub full_path: String,
    pub subscribers: usize,
    pub retained_value: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WildcardSnapshot {
    pub multi_level: Vec<WildcardEntry>,
    pub single_level: Vec<WildcardEntry>,
}

#[derive(Debug, Serialize)]
pub struct WildcardEntry {
    pub pattern: String,
    pub client_id: String,
}

#[derive(Debug, Serialize)]
pub struct StreamSnapshot {
    pub topics: Vec<StreamTopicView>,
}

#[derive(Debug, Serialize)]
pub struct StreamTopicView {
    pub name: String,
    pub partitions: Vec<PartitionView>,
    pub groups: Vec<GroupView>,
}

#[derive(Debug, Serialize)]
pub struct PartitionView {
    pub partition: u32,
    pub message_count: usize,
    pub next_seq: u64,
}

#[derive(Debug, Serialize)]
pub struct GroupView {
    pub group: String,
    pub generation: u64,
    pub members: Vec<String>,
    pub committed_offsets: Vec<u64>,
}
