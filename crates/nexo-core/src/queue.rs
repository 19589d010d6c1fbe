//! Queue broker (C6): per-named priority/FIFO queue with delayed delivery,
//! visibility-timeout-based at-least-once redelivery, and a dead-letter
//! sibling queue.
//!
//! Lazy tombstoning mirrors the KV broker's approach: a TTL sweep can
//! remove a message's entry from `messages` while a stale id still sits in
//! `pending`/`scheduled`; consumers and the delay sweep simply skip ids
//! that no longer resolve rather than eagerly scrubbing every index.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nexo_protocol::AnyValue;
use tokio::sync::{Notify, RwLock};
use uuid::Uuid;

use crate::error::QueueError;
use crate::ids::ConnId;
use crate::snapshot::{render_any, DlqMessageView, DlqQueueView, MessageView, QueueSnapshot, QueueView};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    Memory,
    FileSync,
    FileAsync,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub visibility_timeout_ms: u64,
    pub max_retries: u32,
    pub ttl_ms: u64,
    pub delay_ms_default: u64,
    pub persistence: Persistence,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_ms: 30_000,
            max_retries: 5,
            ttl_ms: 0,
            delay_ms_default: 0,
            persistence: Persistence::Memory,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageState {
    Scheduled,
    Pending,
    InFlight,
    Dead,
}

#[derive(Debug, Clone)]
struct Message {
    id: Uuid,
    payload: AnyValue,
    priority: u8,
    state: MessageState,
    attempts: u32,
    enqueued_at: Instant,
    visible_after: Option<Instant>,
    holder: Option<ConnId>,
    failure_reason: Option<String>,
}

#[derive(PartialEq, Eq)]
struct PendingEntry {
    priority: u8,
    seq: Reverse<u64>,
    id: Uuid,
}

impl Ord for PendingEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority.cmp(&other.priority).then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct QueueState {
    config: QueueConfig,
    seq_counter: u64,
    pending: BinaryHeap<PendingEntry>,
    scheduled: BTreeMap<(Instant, u64), Uuid>,
    messages: HashMap<Uuid, Message>,
    dlq: VecDeque<Uuid>,
    /// Woken whenever a message becomes ready in `pending`, so a parked
    /// long-poll consumer (see [`QueueBroker::consume_wait`]) doesn't have
    /// to busy-poll.
    notify: Arc<Notify>,
}

impl QueueState {
    fn new(config: QueueConfig) -> Self {
        Self {
            config,
            seq_counter: 0,
            pending: BinaryHeap::new(),
            scheduled: BTreeMap::new(),
            messages: HashMap::new(),
            dlq: VecDeque::new(),
            notify: Arc::new(Notify::new()),
        }
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.seq_counter;
        self.seq_counter += 1;
        seq
    }
}

#[derive(Default)]
pub struct QueueBroker {
    queues: RwLock<HashMap<String, QueueState>>,
}

impl QueueBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// `passive = true` makes an existing queue a no-op success instead of
    /// `AlreadyExists`.
    pub async fn create(&self, name: String, config: QueueConfig, passive: bool) -> Result<(), QueueError> {
        let mut queues = self.queues.write().await;
        if queues.contains_key(&name) {
            if passive {
                Ok(())
            } else {
                Err(QueueError::AlreadyExists(name))
            }
        } else {
            queues.insert(name, QueueState::new(config));
            Ok(())
        }
    }

    pub async fn push(&self, name: &str, priority: u8, delay_ms: u64, payload: AnyValue) -> Result<Uuid, QueueError> {
        let mut queues = self.queues.write().await;
        let state = queues.get_mut(name).ok_or_else(|| QueueError::NotFound(name.to_owned()))?;
        let id = Uuid::new_v4();
        let seq = state.next_seq();
        let now = Instant::now();
        let delay_ms = if delay_ms > 0 { delay_ms } else { state.config.delay_ms_default };

        let message_state = if delay_ms > 0 { MessageState::Scheduled } else { MessageState::Pending };
        if delay_ms > 0 {
            state.scheduled.insert((now + Duration::from_millis(delay_ms), seq), id);
        } else {
            state.pending.push(PendingEntry { priority, seq: Reverse(seq), id });
            state.notify.notify_waiters();
        }
        state.messages.insert(
            id,
            Message {
                id,
                payload,
                priority,
                state: message_state,
                attempts: 0,
                enqueued_at: now,
                visible_after: None,
                holder: None,
                failure_reason: None,
            },
        );
        Ok(id)
    }

    /// Pops up to `max_messages` ready messages, highest priority first
    /// with FIFO tiebreak, and marks them `InFlight` under `conn_id` until
    /// `visibility_timeout_ms` elapses.
    pub async fn consume(
        &self,
        name: &str,
        conn_id: ConnId,
        max_messages: usize,
    ) -> Result<Vec<(Uuid, AnyValue, u8, u32)>, QueueError> {
        let mut queues = self.queues.write().await;
        let state = queues.get_mut(name).ok_or_else(|| QueueError::NotFound(name.to_owned()))?;
        let now = Instant::now();
        let visibility = Duration::from_millis(state.config.visibility_timeout_ms);

        let mut out = Vec::with_capacity(max_messages);
        while out.len() < max_messages {
            let Some(entry) = state.pending.pop() else { break };
            let Some(msg) = state.messages.get_mut(&entry.id) else { continue };
            msg.state = MessageState::InFlight;
            msg.attempts += 1;
            msg.visible_after = Some(now + visibility);
            msg.holder = Some(conn_id);
            out.push((msg.id, msg.payload.clone(), msg.priority, msg.attempts));
        }
        Ok(out)
    }

    /// Like [`Self::consume`], but when the immediate result is empty and
    /// `wait_ms > 0`, parks until a message becomes ready, `wait_ms`
    /// elapses (returns empty), or the queue disappears out from under the
    /// caller. The caller is expected to race this future against its own
    /// connection-closed signal (spec.md §4.2/§5 cancellation sources).
    pub async fn consume_wait(
        &self,
        name: &str,
        conn_id: ConnId,
        max_messages: usize,
        wait_ms: u64,
    ) -> Result<Vec<(Uuid, AnyValue, u8, u32)>, QueueError> {
        let deadline = Instant::now() + Duration::from_millis(wait_ms);
        loop {
            let out = self.consume(name, conn_id, max_messages).await?;
            if !out.is_empty() || wait_ms == 0 {
                return Ok(out);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(out);
            }
            let notify = {
                let queues = self.queues.read().await;
                let state = queues.get(name).ok_or_else(|| QueueError::NotFound(name.to_owned()))?;
                state.notify.clone()
            };
            tokio::select! {
                () = notify.notified() => {}
                () = tokio::time::sleep(deadline - now) => return Ok(Vec::new()),
            }
        }
    }

    /// Permanently removes an in-flight message. Returns `false` if the id
    /// is unknown or not currently in flight (already acked/expired).
    pub async fn ack(&self, name: &str, id: Uuid) -> Result<bool, QueueError> {
        let mut queues = self.queues.write().await;
        let state = queues.get_mut(name).ok_or_else(|| QueueError::NotFound(name.to_owned()))?;
        match state.messages.get(&id) {
            Some(msg) if msg.state == MessageState::InFlight => {
                state.messages.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Explicit negative ack: requeues for retry, or moves to the DLQ once
    /// `max_retries` is exhausted, preserving the caller-supplied `reason`
    /// as the DLQ entry's `failure_reason`.
    pub async fn nack(&self, name: &str, id: Uuid, reason: Option<String>) -> Result<(), QueueError> {
        let mut queues = self.queues.write().await;
        let state = queues.get_mut(name).ok_or_else(|| QueueError::NotFound(name.to_owned()))?;
        Self::requeue_or_dead_letter(state, id, reason);
        Ok(())
    }

    fn requeue_or_dead_letter(state: &mut QueueState, id: Uuid, failure_reason: Option<String>) {
        let max_retries = state.config.max_retries;
        let Some(msg) = state.messages.get_mut(&id) else { return };
        msg.visible_after = None;
        msg.holder = None;
        if msg.attempts > max_retries {
            msg.state = MessageState::Dead;
            msg.failure_reason = failure_reason.or_else(|| Some("max retries exceeded".to_owned()));
            state.dlq.push_back(id);
        } else {
            msg.state = MessageState::Pending;
            let seq = state.next_seq();
            state.pending.push(PendingEntry { priority: msg.priority, seq: Reverse(seq), id });
            state.notify.notify_waiters();
        }
    }

    /// C9 sweep: requeues or dead-letters in-flight messages whose
    /// visibility deadline has passed. Returns the count processed.
    pub async fn sweep_visibility(&self, name: &str, batch: usize) -> Result<usize, QueueError> {
        let mut queues = self.queues.write().await;
        let state = queues.get_mut(name).ok_or_else(|| QueueError::NotFound(name.to_owned()))?;
        let now = Instant::now();
        let expired: Vec<Uuid> = state
            .messages
            .values()
            .filter(|m| m.state == MessageState::InFlight && m.visible_after.is_some_and(|t| t <= now))
            .take(batch)
            .map(|m| m.id)
            .collect();
        for id in &expired {
            Self::requeue_or_dead_letter(state, *id, Some("visibility timeout expired".to_owned()));
        }
        Ok(expired.len())
    }

    /// C9 sweep: moves scheduled (delayed) messages whose delivery time has
    /// arrived into `pending`.
    pub async fn sweep_delayed(&self, name: &str, batch: usize) -> Result<usize, QueueError> {
        let mut queues = self.queues.write().await;
        let state = queues.get_mut(name).ok_or_else(|| QueueError::NotFound(name.to_owned()))?;
        let now = Instant::now();
        let ready: Vec<(Instant, u64)> =
            state.scheduled.iter().take_while(|(k, _)| k.0 <= now).take(batch).map(|(k, _)| *k).collect();
        let mut moved = 0;
        for key in ready {
            let Some(id) = state.scheduled.remove(&key) else { continue };
            let Some(msg) = state.messages.get_mut(&id) else { continue };
            msg.state = MessageState::Pending;
            let seq = state.next_seq();
            state.pending.push(PendingEntry { priority: msg.priority, seq: Reverse(seq), id });
            moved += 1;
        }
        if moved > 0 {
            state.notify.notify_waiters();
        }
        Ok(moved)
    }

    /// C9 sweep: drops pending/scheduled messages past `ttl_ms` since
    /// enqueue. `ttl_ms == 0` disables the sweep for this queue.
    pub async fn sweep_ttl(&self, name: &str, batch: usize) -> Result<usize, QueueError> {
        let mut queues = self.queues.write().await;
        let state = queues.get_mut(name).ok_or_else(|| QueueError::NotFound(name.to_owned()))?;
        if state.config.ttl_ms == 0 {
            return Ok(0);
        }
        let now = Instant::now();
        let ttl = Duration::from_millis(state.config.ttl_ms);
        let expired: Vec<Uuid> = state
            .messages
            .values()
            .filter(|m| {
                matches!(m.state, MessageState::Pending | MessageState::Scheduled)
                    && now.duration_since(m.enqueued_at) >= ttl
            })
            .take(batch)
            .map(|m| m.id)
            .collect();
        for id in &expired {
            state.messages.remove(id);
        }
        Ok(expired.len())
    }

    /// Non-destructive, paginated read of a queue's DLQ, oldest-first.
    pub async fn dlq_peek(
        &self,
        name: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<(Uuid, AnyValue, u32, Option<String>)>, QueueError> {
        let queues = self.queues.read().await;
        let state = queues.get(name).ok_or_else(|| QueueError::NotFound(name.to_owned()))?;
        Ok(state
            .dlq
            .iter()
            .skip(offset)
            .take(limit)
            .filter_map(|id| {
                state.messages.get(id).map(|m| (m.id, m.payload.clone(), m.attempts, m.failure_reason.clone()))
            })
            .collect())
    }

    /// Removes one DLQ entry permanently. Returns `false` if `id` isn't in
    /// the DLQ.
    pub async fn dlq_delete(&self, name: &str, id: Uuid) -> Result<bool, QueueError> {
        let mut queues = self.queues.write().await;
        let state = queues.get_mut(name).ok_or_else(|| QueueError::NotFound(name.to_owned()))?;
        let Some(pos) = state.dlq.iter().position(|dlq_id| *dlq_id == id) else { return Ok(false) };
        state.dlq.remove(pos);
        state.messages.remove(&id);
        Ok(true)
    }

    pub async fn dlq_purge(&self, name: &str) -> Result<usize, QueueError> {
        let mut queues = self.queues.write().await;
        let state = queues.get_mut(name).ok_or_else(|| QueueError::NotFound(name.to_owned()))?;
        let count = state.dlq.len();
        for id in state.dlq.drain(..) {
            state.messages.remove(&id);
        }
        Ok(count)
    }

    /// Moves a dead-lettered message back to `pending`, resetting its
    /// attempt counter. Returns `false` if `id` isn't in the DLQ.
    pub async fn dlq_replay(&self, name: &str, id: Uuid) -> Result<bool, QueueError> {
        let mut queues = self.queues.write().await;
        let state = queues.get_mut(name).ok_or_else(|| QueueError::NotFound(name.to_owned()))?;
        let Some(pos) = state.dlq.iter().position(|dlq_id| *dlq_id == id) else { return Ok(false) };
        state.dlq.remove(pos);
        if let Some(msg) = state.messages.get_mut(&id) {
            msg.state = MessageState::Pending;
            msg.attempts = 0;
            msg.failure_reason = None;
            let seq = state.next_seq();
            state.pending.push(PendingEntry { priority: msg.priority, seq: Reverse(seq), id });
            state.notify.notify_waiters();
        }
        Ok(true)
    }

    /// Releases every message the connection is currently holding
    /// in-flight, across all queues, back to pending (respecting
    /// `max_retries` as if it were a nack).
    pub async fn on_disconnect(&self, conn_id: ConnId) {
        let mut queues = self.queues.write().await;
        for state in queues.values_mut() {
            let held: Vec<Uuid> = state
                .messages
                .values()
                .filter(|m| m.state == MessageState::InFlight && m.holder == Some(conn_id))
                .map(|m| m.id)
                .collect();
            for id in held {
                Self::requeue_or_dead_letter(state, id, Some("connection closed".to_owned()));
            }
        }
    }

    /// Queue names, for the C9 sweepers to iterate without holding the
    /// broker lock across each queue's own sweep.
    pub async fn names(&self) -> Vec<String> {
        self.queues.read().await.keys().cloned().collect()
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        let queues = self.queues.read().await;
        let mut active_queues = Vec::new();
        let mut dlq_queues = Vec::new();

        for (name, state) in queues.iter() {
            let mut pending = Vec::new();
            let mut inflight = Vec::new();
            let mut scheduled = Vec::new();
            for msg in state.messages.values() {
                let view = MessageView {
                    id: msg.id.to_string(),
                    payload: render_any(&msg.payload),
                    state: format!("{:?}", msg.state).to_lowercase(),
                    priority: msg.priority,
                    attempts: msg.attempts,
                    next_delivery_at: (msg.state == MessageState::Scheduled).then(|| "pending-delay".to_owned()),
                };
                match msg.state {
                    MessageState::Pending => pending.push(view),
                    MessageState::InFlight => inflight.push(view),
                    MessageState::Scheduled => scheduled.push(view),
                    MessageState::Dead => {}
                }
            }
            active_queues.push(QueueView { name: name.clone(), pending, inflight, scheduled });

            let messages = state
                .dlq
                .iter()
                .filter_map(|id| state.messages.get(id))
                .map(|msg| DlqMessageView {
                    id: msg.id.to_string(),
                    payload: render_any(&msg.payload),
                    attempts: msg.attempts,
                    failure_reason: msg.failure_reason.clone(),
                })
                .collect();
            dlq_queues.push(DlqQueueView { name: format!("{name}.dlq"), messages });
        }

        QueueSnapshot { active_queues, dlq_queues }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, pause};

    fn raw(n: u8) -> AnyValue {
        AnyValue::Raw(vec![n])
    }

    async fn queue_with(config: QueueConfig) -> (QueueBroker, &'static str) {
        let broker = QueueBroker::new();
        broker.create("q".into(), config, false).await.unwrap();
        (broker, "q")
    }

    #[tokio::test]
    async fn higher_priority_is_delivered_first() {
        let (broker, q) = queue_with(QueueConfig::default()).await;
        broker.push(q, 1, 0, raw(1)).await.unwrap();
        broker.push(q, 9, 0, raw(2)).await.unwrap();
        let delivered = broker.consume(q, 1, 2).await.unwrap();
        assert_eq!(delivered[0].2, 9);
        assert_eq!(delivered[1].2, 1);
    }

    #[tokio::test]
    async fn same_priority_is_fifo() {
        let (broker, q) = queue_with(QueueConfig::default()).await;
        let first = broker.push(q, 5, 0, raw(1)).await.unwrap();
        let second = broker.push(q, 5, 0, raw(2)).await.unwrap();
        let delivered = broker.consume(q, 1, 2).await.unwrap();
        assert_eq!(delivered[0].0, first);
        assert_eq!(delivered[1].0, second);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_push_is_invisible_until_delay_elapses() {
        pause();
        let (broker, q) = queue_with(QueueConfig::default()).await;
        broker.push(q, 0, 2_000, raw(1)).await.unwrap();
        assert!(broker.consume(q, 1, 1).await.unwrap().is_empty());

        advance(Duration::from_millis(2_100)).await;
        broker.sweep_delayed(q, 10).await.unwrap();
        let delivered = broker.consume(q, 1, 1).await.unwrap();
        assert_eq!(delivered.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unacked_message_is_redelivered_after_visibility_timeout() {
        pause();
        let config = QueueConfig { visibility_timeout_ms: 1_000, ..Default::default() };
        let (broker, q) = queue_with(config).await;
        let id = broker.push(q, 0, 0, raw(1)).await.unwrap();
        let first = broker.consume(q, 1, 1).await.unwrap();
        assert_eq!(first[0].0, id);
        assert_eq!(first[0].3, 1);

        advance(Duration::from_millis(1_100)).await;
        let swept = broker.sweep_visibility(q, 10).await.unwrap();
        assert_eq!(swept, 1);

        let second = broker.consume(q, 2, 1).await.unwrap();
        assert_eq!(second[0].0, id);
        assert_eq!(second[0].3, 2);
    }

    #[tokio::test]
    async fn max_retries_zero_sends_to_dlq_after_one_attempt() {
        let config = QueueConfig { max_retries: 0, ..Default::default() };
        let (broker, q) = queue_with(config).await;
        let id = broker.push(q, 0, 0, raw(1)).await.unwrap();
        broker.consume(q, 1, 1).await.unwrap();
        broker.nack(q, id, None).await.unwrap();

        assert!(broker.consume(q, 1, 1).await.unwrap().is_empty());
        let snap = broker.snapshot().await;
        let dlq = snap.dlq_queues.iter().find(|d| d.name == "q.dlq").unwrap();
        assert_eq!(dlq.messages.len(), 1);
    }

    #[tokio::test]
    async fn dlq_replay_requeues_with_reset_attempts() {
        let config = QueueConfig { max_retries: 0, ..Default::default() };
        let (broker, q) = queue_with(config).await;
        let id = broker.push(q, 0, 0, raw(1)).await.unwrap();
        broker.consume(q, 1, 1).await.unwrap();
        broker.nack(q, id, None).await.unwrap();

        assert!(broker.dlq_replay(q, id).await.unwrap());
        let delivered = broker.consume(q, 1, 1).await.unwrap();
        assert_eq!(delivered[0].0, id);
        assert_eq!(delivered[0].3, 1);
    }

    #[tokio::test]
    async fn dlq_peek_is_non_destructive_and_paginated() {
        let config = QueueConfig { max_retries: 0, ..Default::default() };
        let (broker, q) = queue_with(config).await;
        for n in 0..3u8 {
            let id = broker.push(q, 0, 0, raw(n)).await.unwrap();
            broker.consume(q, 1, 1).await.unwrap();
            broker.nack(q, id, None).await.unwrap();
        }

        let page1 = broker.dlq_peek(q, 2, 0).await.unwrap();
        assert_eq!(page1.len(), 2);
        let page2 = broker.dlq_peek(q, 2, 2).await.unwrap();
        assert_eq!(page2.len(), 1);

        // peeking again returns the same entries: nothing was removed.
        assert_eq!(broker.dlq_peek(q, 10, 0).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn dlq_delete_removes_exactly_one_entry() {
        let config = QueueConfig { max_retries: 0, ..Default::default() };
        let (broker, q) = queue_with(config).await;
        let id = broker.push(q, 0, 0, raw(1)).await.unwrap();
        broker.consume(q, 1, 1).await.unwrap();
        broker.nack(q, id, None).await.unwrap();

        assert!(broker.dlq_delete(q, id).await.unwrap());
        assert!(!broker.dlq_delete(q, id).await.unwrap());
        assert!(broker.dlq_peek(q, 10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn disconnect_releases_in_flight_messages_back_to_pending() {
        let (broker, q) = queue_with(QueueConfig::default()).await;
        let id = broker.push(q, 0, 0, raw(1)).await.unwrap();
        broker.consume(q, 42, 1).await.unwrap();
        broker.on_disconnect(42).await;

        let delivered = broker.consume(q, 99, 1).await.unwrap();
        assert_eq!(delivered[0].0, id);
    }

    #[tokio::test]
    async fn create_is_idempotent_when_passive() {
        let broker = QueueBroker::new();
        broker.create("q".into(), QueueConfig::default(), false).await.unwrap();
        assert!(broker.create("q".into(), QueueConfig::default(), false).await.is_err());
        assert!(broker.create("q".into(), QueueConfig::default(), true).await.is_ok());
    }

    #[tokio::test]
    async fn push_to_missing_queue_is_not_found() {
        let broker = QueueBroker::new();
        assert!(broker.push("ghost", 0, 0, raw(1)).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn consume_wait_wakes_as_soon_as_a_message_is_pushed() {
        let broker = Arc::new(QueueBroker::new());
        broker.create("q".into(), QueueConfig::default(), false).await.unwrap();

        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.consume_wait("q", 1, 1, 5_000).await.unwrap() })
        };
        tokio::task::yield_now().await;

        broker.push("q", 0, 0, raw(7)).await.unwrap();
        let delivered = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert_eq!(delivered.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn consume_wait_returns_empty_after_wait_ms_elapses() {
        pause();
        let (broker, q) = queue_with(QueueConfig::default()).await;
        let delivered = broker.consume_wait(q, 1, 1, 200).await.unwrap();
        assert!(delivered.is_empty());
    }
}
