//! Dispatcher (C3): decodes an opcode's positional payload, calls into the
//! target broker, and encodes `(status, body)`.
//!
//! Argument orderings are documented per handler since the wire format has
//! no self-describing schema. A handful of opcodes (`Q_CONSUME`,
//! `Q_PEEK_DLQ`, `S_FETCH`) need more than one trailing `any` value in a
//! single response, which the shared codec's "any is always last" rule
//! can't express; those bodies instead prefix each embedded `any` with an
//! explicit `u32` byte count (tag byte included), a convention local to
//! this dispatcher rather than `nexo_protocol::PayloadReader`/`Writer`.

use std::sync::Arc;

use nexo_core::{
    ConnId, KvBroker, Persistence, PubSubBroker, QueueBroker, QueueConfig, RetentionConfig, SeekTarget, StreamBroker,
};
use nexo_protocol::opcodes::{error_tokens, push_kind, status, *};
use nexo_protocol::{encode_push, AnyValue, DataType, FrameError, PayloadReader, PayloadWriter};

use crate::registry::ConnectionRegistry;

/// The four broker aggregates a connection's requests may address.
#[derive(Clone)]
pub struct Brokers {
    pub kv: Arc<KvBroker>,
    pub pubsub: Arc<PubSubBroker>,
    pub queue: Arc<QueueBroker>,
    pub stream: Arc<StreamBroker>,
}

impl Brokers {
    pub fn new() -> Self {
        Self {
            kv: Arc::new(KvBroker::new()),
            pubsub: Arc::new(PubSubBroker::new()),
            queue: Arc::new(QueueBroker::new()),
            stream: Arc::new(StreamBroker::new()),
        }
    }
}

impl Default for Brokers {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads a `u32` length prefix followed by that many bytes interpreted as
/// an `any` value (tag byte + body). See the module doc for why this
/// exists alongside [`PayloadReader::read_any`].
fn read_any_prefixed(r: &mut PayloadReader) -> Result<AnyValue, FrameError> {
    let len = r.read_u32()? as usize;
    if len == 0 {
        return Err(FrameError::Truncated);
    }
    let tag = r.read_u8()?;
    let data_type = DataType::from_tag(tag)?;
    let body = r.read_bytes(len - 1)?;
    AnyValue::from_parts(data_type, body.to_vec())
}

fn write_any_prefixed(w: &mut PayloadWriter, v: &AnyValue) {
    w.write_u32(v.as_bytes().len() as u32 + 1);
    w.write_any(v);
}

fn ok() -> (u8, Vec<u8>) {
    (status::OK, Vec::new())
}

fn null() -> (u8, Vec<u8>) {
    (status::NULL, Vec::new())
}

fn data(body: Vec<u8>) -> (u8, Vec<u8>) {
    (status::DATA, body)
}

fn err(message: impl Into<String>) -> (u8, Vec<u8>) {
    let mut w = PayloadWriter::new();
    w.write_string(&message.into());
    (status::ERR, w.into_bytes())
}

fn bad_frame(e: FrameError) -> (u8, Vec<u8>) {
    err(e.to_string())
}

/// Routes a decoded request to its handler. `conn_id` is the caller's own
/// connection id, used for queue/stream holder tracking and as the
/// delivery target for retained PubSub values. `registry` is needed only
/// by `OP_PUB`, to turn matching subscriber ids back into outbound queues.
pub async fn dispatch(
    brokers: &Brokers,
    registry: &ConnectionRegistry,
    conn_id: ConnId,
    opcode: u8,
    payload: &[u8],
) -> (u8, Vec<u8>) {
    let mut r = PayloadReader::new(payload);
    match opcode {
        OP_ECHO => data(payload.to_vec()),

        OP_KV_SET => kv_set(brokers, &mut r).await,
        OP_KV_GET => kv_get(brokers, &mut r).await,
        OP_KV_DEL => kv_del(brokers, &mut r).await,

        OP_Q_CREATE => q_create(brokers, &mut r).await,
        OP_Q_PUSH => q_push(brokers, &mut r).await,
        OP_Q_CONSUME => q_consume(brokers, conn_id, &mut r).await,
        OP_Q_ACK => q_ack(brokers, &mut r).await,
        OP_Q_NACK => q_nack(brokers, &mut r).await,
        OP_Q_PEEK_DLQ => q_peek_dlq(brokers, &mut r).await,
        OP_Q_MOVE_TO_QUEUE => q_move_to_queue(brokers, &mut r).await,
        OP_Q_DELETE_DLQ => q_delete_dlq(brokers, &mut r).await,
        OP_Q_PURGE_DLQ => q_purge_dlq(brokers, &mut r).await,

        OP_SUB => sub(brokers, registry, conn_id, &mut r).await,
        OP_UNSUB => unsub(brokers, conn_id, &mut r).await,
        OP_PUB => pub_(brokers, registry, &mut r).await,

        OP_S_CREATE => s_create(brokers, &mut r).await,
        OP_S_PUB => s_pub(brokers, &mut r).await,
        OP_S_JOIN => s_join(brokers, conn_id, &mut r).await,
        OP_S_FETCH => s_fetch(brokers, conn_id, &mut r).await,
        OP_S_ACK => s_ack(brokers, &mut r).await,
        OP_S_COMMIT => s_commit(brokers, &mut r).await,
        OP_S_NACK => s_nack(brokers, &mut r).await,
        OP_S_SEEK => s_seek(brokers, &mut r).await,

        other => err(format!("unknown opcode {other:#04x}")),
    }
}

/// Notifies every broker that `conn_id` has gone away: releases in-flight
/// queue messages, removes pubsub subscriptions, and rebalances stream
/// group memberships.
pub async fn on_disconnect(brokers: &Brokers, conn_id: ConnId) {
    brokers.pubsub.on_disconnect(conn_id).await;
    brokers.queue.on_disconnect(conn_id).await;
    brokers.stream.on_disconnect(conn_id).await;
}

// --- KV (C4) ---------------------------------------------------------

/// SET(key: string, ttl_seconds_or_0: u64, value: any) -> OK
async fn kv_set(brokers: &Brokers, r: &mut PayloadReader<'_>) -> (u8, Vec<u8>) {
    let key = match r.read_string() {
        Ok(k) => k,
        Err(e) => return bad_frame(e),
    };
    let ttl_secs = match r.read_u64() {
        Ok(t) => t,
        Err(e) => return bad_frame(e),
    };
    let value = match r.read_any() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    brokers.kv.set(key, ttl_secs, value).await;
    ok()
}

/// GET(key: string) -> NULL | DATA(any)
async fn kv_get(brokers: &Brokers, r: &mut PayloadReader<'_>) -> (u8, Vec<u8>) {
    let key = match r.read_string() {
        Ok(k) => k,
        Err(e) => return bad_frame(e),
    };
    match brokers.kv.get(&key).await {
        Some(value) => {
            let mut w = PayloadWriter::new();
            w.write_any(&value);
            data(w.into_bytes())
        }
        None => null(),
    }
}

/// DEL(key: string) -> OK (idempotent)
async fn kv_del(brokers: &Brokers, r: &mut PayloadReader<'_>) -> (u8, Vec<u8>) {
    let key = match r.read_string() {
        Ok(k) => k,
        Err(e) => return bad_frame(e),
    };
    brokers.kv.del(&key).await;
    ok()
}

// --- Queue (C6) --------------------------------------------------------

fn persistence_from_tag(tag: u8) -> Persistence {
    match tag {
        1 => Persistence::FileSync,
        2 => Persistence::FileAsync,
        _ => Persistence::Memory,
    }
}

/// Q_CREATE(name: string, visibility_timeout_ms: u64, max_retries: u32,
/// ttl_ms: u64, delay_ms_default: u64, passive: u8, persistence: u8) -> OK
async fn q_create(brokers: &Brokers, r: &mut PayloadReader<'_>) -> (u8, Vec<u8>) {
    let name = match r.read_string() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    let visibility_timeout_ms = match r.read_u64() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    let max_retries = match r.read_u32() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    let ttl_ms = match r.read_u64() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    let delay_ms_default = match r.read_u64() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    let passive = match r.read_u8() {
        Ok(v) => v != 0,
        Err(e) => return bad_frame(e),
    };
    let persistence = match r.read_u8() {
        Ok(v) => persistence_from_tag(v),
        Err(e) => return bad_frame(e),
    };
    let config = QueueConfig { visibility_timeout_ms, max_retries, ttl_ms, delay_ms_default, persistence };
    match brokers.queue.create(name, config, passive).await {
        Ok(()) => ok(),
        Err(e) => err(e.to_string()),
    }
}

/// Q_PUSH(name: string, priority: u8, delay_ms: u64, payload: any) -> DATA(uuid)
async fn q_push(brokers: &Brokers, r: &mut PayloadReader<'_>) -> (u8, Vec<u8>) {
    let name = match r.read_string() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    let priority = match r.read_u8() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    let delay_ms = match r.read_u64() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    let payload = match r.read_any() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    match brokers.queue.push(&name, priority, delay_ms, payload).await {
        Ok(id) => {
            let mut w = PayloadWriter::new();
            w.write_uuid(id);
            data(w.into_bytes())
        }
        Err(e) => err(e.to_string()),
    }
}

/// Q_CONSUME(name: string, max_messages: u32, wait_ms: u64) ->
/// DATA(u32 count | [uuid id | u8 priority | u32 attempts | any payload (length-prefixed)]*)
async fn q_consume(brokers: &Brokers, conn_id: ConnId, r: &mut PayloadReader<'_>) -> (u8, Vec<u8>) {
    let name = match r.read_string() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    let max_messages = match r.read_u32() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    let wait_ms = match r.read_u64() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    match brokers.queue.consume_wait(&name, conn_id, max_messages as usize, wait_ms).await {
        Ok(messages) => {
            let mut w = PayloadWriter::new();
            w.write_u32(messages.len() as u32);
            for (id, payload, priority, attempts) in messages {
                w.write_uuid(id).write_u8(priority).write_u32(attempts);
                write_any_prefixed(&mut w, &payload);
            }
            data(w.into_bytes())
        }
        Err(e) => err(e.to_string()),
    }
}

/// Q_ACK(name: string, id: uuid) -> OK (idempotent)
async fn q_ack(brokers: &Brokers, r: &mut PayloadReader<'_>) -> (u8, Vec<u8>) {
    let name = match r.read_string() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    let id = match r.read_uuid() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    match brokers.queue.ack(&name, id).await {
        Ok(_) => ok(),
        Err(e) => err(e.to_string()),
    }
}

/// Q_NACK(name: string, id: uuid, reason: string) -> OK
async fn q_nack(brokers: &Brokers, r: &mut PayloadReader<'_>) -> (u8, Vec<u8>) {
    let name = match r.read_string() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    let id = match r.read_uuid() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    let reason = match r.read_string() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    let reason = (!reason.is_empty()).then_some(reason);
    match brokers.queue.nack(&name, id, reason).await {
        Ok(()) => ok(),
        Err(e) => err(e.to_string()),
    }
}

/// Q_PEEK_DLQ(name: string, limit: u32, offset: u32) ->
/// DATA(u32 count | [uuid id | u32 attempts | string failure_reason (empty if none) | any payload (length-prefixed)]*)
async fn q_peek_dlq(brokers: &Brokers, r: &mut PayloadReader<'_>) -> (u8, Vec<u8>) {
    let name = match r.read_string() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    let limit = match r.read_u32() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    let offset = match r.read_u32() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    match brokers.queue.dlq_peek(&name, limit as usize, offset as usize).await {
        Ok(entries) => {
            let mut w = PayloadWriter::new();
            w.write_u32(entries.len() as u32);
            for (id, payload, attempts, failure_reason) in entries {
                w.write_uuid(id).write_u32(attempts).write_string(failure_reason.as_deref().unwrap_or(""));
                write_any_prefixed(&mut w, &payload);
            }
            data(w.into_bytes())
        }
        Err(e) => err(e.to_string()),
    }
}

/// Q_MOVE_TO_QUEUE(name: string, id: uuid) -> DATA(u8 moved)
async fn q_move_to_queue(brokers: &Brokers, r: &mut PayloadReader<'_>) -> (u8, Vec<u8>) {
    let name = match r.read_string() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    let id = match r.read_uuid() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    match brokers.queue.dlq_replay(&name, id).await {
        Ok(moved) => {
            let mut w = PayloadWriter::new();
            w.write_u8(u8::from(moved));
            data(w.into_bytes())
        }
        Err(e) => err(e.to_string()),
    }
}

/// Q_DELETE_DLQ(name: string, id: uuid) -> DATA(u8 deleted)
async fn q_delete_dlq(brokers: &Brokers, r: &mut PayloadReader<'_>) -> (u8, Vec<u8>) {
    let name = match r.read_string() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    let id = match r.read_uuid() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    match brokers.queue.dlq_delete(&name, id).await {
        Ok(deleted) => {
            let mut w = PayloadWriter::new();
            w.write_u8(u8::from(deleted));
            data(w.into_bytes())
        }
        Err(e) => err(e.to_string()),
    }
}

/// Q_PURGE_DLQ(name: string) -> DATA(u32 count_removed)
async fn q_purge_dlq(brokers: &Brokers, r: &mut PayloadReader<'_>) -> (u8, Vec<u8>) {
    let name = match r.read_string() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    match brokers.queue.dlq_purge(&name).await {
        Ok(count) => {
            let mut w = PayloadWriter::new();
            w.write_u32(count as u32);
            data(w.into_bytes())
        }
        Err(e) => err(e.to_string()),
    }
}

// --- PubSub (C5) -------------------------------------------------------

/// SUB(pattern: string) -> OK. Any retained values matching `pattern` are
/// delivered as `PUBSUB` push frames to the caller before the response.
async fn sub(brokers: &Brokers, registry: &ConnectionRegistry, conn_id: ConnId, r: &mut PayloadReader<'_>) -> (u8, Vec<u8>) {
    let pattern = match r.read_string() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    match brokers.pubsub.subscribe(conn_id, &pattern).await {
        Ok(retained) => {
            if let Some(outbound) = registry.get(conn_id).await {
                for (topic, value) in retained {
                    let mut w = PayloadWriter::new();
                    w.write_string(&topic).write_any(&value);
                    outbound.send(encode_push(0, push_kind::PUBSUB, &w.into_bytes())).await;
                }
            }
            ok()
        }
        Err(e) => err(e.to_string()),
    }
}

/// UNSUB(pattern: string) -> OK
async fn unsub(brokers: &Brokers, conn_id: ConnId, r: &mut PayloadReader<'_>) -> (u8, Vec<u8>) {
    let pattern = match r.read_string() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    brokers.pubsub.unsubscribe(conn_id, &pattern).await;
    ok()
}

/// PUB(topic: string, retain: u8, value: any) -> OK. Fans the push out to
/// every matching subscriber, dropping it for any whose outbound queue is
/// saturated rather than blocking the publisher.
async fn pub_(brokers: &Brokers, registry: &ConnectionRegistry, r: &mut PayloadReader<'_>) -> (u8, Vec<u8>) {
    let topic = match r.read_string() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    let retain = match r.read_u8() {
        Ok(v) => v != 0,
        Err(e) => return bad_frame(e),
    };
    let value = match r.read_any() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };

    let mut w = PayloadWriter::new();
    w.write_string(&topic).write_any(&value);
    let frame = encode_push(0, push_kind::PUBSUB, &w.into_bytes());

    let recipients = brokers.pubsub.publish(&topic, retain, value).await;
    registry.push_lossy(&recipients, &frame).await;
    ok()
}

// --- Stream (C7) --------------------------------------------------------

/// S_CREATE(name: string, partitions: u32, max_age_ms: u64, max_bytes: u64,
/// persistence: u8) -> OK
async fn s_create(brokers: &Brokers, r: &mut PayloadReader<'_>) -> (u8, Vec<u8>) {
    let name = match r.read_string() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    let partitions = match r.read_u32() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    let max_age_ms = match r.read_u64() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    let max_bytes = match r.read_u64() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    if let Err(e) = r.read_u8() {
        return bad_frame(e);
    }
    match brokers.stream.create(name, partitions, RetentionConfig { max_age_ms, max_bytes }).await {
        Ok(()) => ok(),
        Err(e) => err(e.to_string()),
    }
}

/// S_PUB(name: string, has_routing_key: u8, routing_key: string (present
/// only if has_routing_key != 0), payload: any) -> DATA(u32 partition | u64 seq)
async fn s_pub(brokers: &Brokers, r: &mut PayloadReader<'_>) -> (u8, Vec<u8>) {
    let name = match r.read_string() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    let has_routing_key = match r.read_u8() {
        Ok(v) => v != 0,
        Err(e) => return bad_frame(e),
    };
    let routing_key = if has_routing_key {
        match r.read_string() {
            Ok(v) => Some(v),
            Err(e) => return bad_frame(e),
        }
    } else {
        None
    };
    let payload = match r.read_any() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    match brokers.stream.publish(&name, routing_key.as_deref(), payload).await {
        Ok((partition, seq)) => {
            let mut w = PayloadWriter::new();
            w.write_u32(partition).write_u64(seq);
            data(w.into_bytes())
        }
        Err(e) => err(e.to_string()),
    }
}

/// S_JOIN(name: string, group: string) -> DATA(u64 generation | u32 count | [u32 partition]*)
async fn s_join(brokers: &Brokers, conn_id: ConnId, r: &mut PayloadReader<'_>) -> (u8, Vec<u8>) {
    let name = match r.read_string() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    let group = match r.read_string() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    match brokers.stream.join(&name, &group, conn_id).await {
        Ok((generation, assigned)) => {
            let mut w = PayloadWriter::new();
            w.write_u64(generation).write_u32(assigned.len() as u32);
            for partition in assigned {
                w.write_u32(partition);
            }
            data(w.into_bytes())
        }
        Err(e) => err(e.to_string()),
    }
}

/// S_FETCH(name: string, group: string, generation: u64, max_per_partition: u32) ->
/// DATA(u32 partition_count | [u32 partition | u32 record_count | [u64 seq | any payload (length-prefixed)]*]*)
async fn s_fetch(brokers: &Brokers, conn_id: ConnId, r: &mut PayloadReader<'_>) -> (u8, Vec<u8>) {
    let name = match r.read_string() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    let group = match r.read_string() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    let generation = match r.read_u64() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    let max_per_partition = match r.read_u32() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    match brokers.stream.fetch(&name, &group, conn_id, generation, max_per_partition as usize).await {
        Ok(by_partition) => {
            let mut w = PayloadWriter::new();
            w.write_u32(by_partition.len() as u32);
            for (partition, records) in by_partition {
                w.write_u32(partition).write_u32(records.len() as u32);
                for (seq, payload) in records {
                    w.write_u64(seq);
                    write_any_prefixed(&mut w, &payload);
                }
            }
            data(w.into_bytes())
        }
        Err(e) if e.to_string() == error_tokens::REBALANCE => err(error_tokens::REBALANCE),
        Err(e) => err(e.to_string()),
    }
}

/// S_ACK(name: string, group: string, generation: u64, partition: u32,
/// seq: u64) -> OK. Acknowledges a single record by advancing the
/// committed offset past it; [`OP_S_COMMIT`] exists alongside this for
/// batch/cursor-style commits of an explicit `next_offset`.
async fn s_ack(brokers: &Brokers, r: &mut PayloadReader<'_>) -> (u8, Vec<u8>) {
    let name = match r.read_string() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    let group = match r.read_string() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    let generation = match r.read_u64() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    let partition = match r.read_u32() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    let seq = match r.read_u64() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    match brokers.stream.commit(&name, &group, generation, partition, seq + 1).await {
        Ok(()) => ok(),
        Err(e) => err(e.to_string()),
    }
}

/// S_COMMIT(name: string, group: string, generation: u64, partition: u32,
/// next_offset: u64) -> OK
async fn s_commit(brokers: &Brokers, r: &mut PayloadReader<'_>) -> (u8, Vec<u8>) {
    let name = match r.read_string() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    let group = match r.read_string() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    let generation = match r.read_u64() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    let partition = match r.read_u32() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    let next_offset = match r.read_u64() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    match brokers.stream.commit(&name, &group, generation, partition, next_offset).await {
        Ok(()) => ok(),
        Err(e) => err(e.to_string()),
    }
}

/// S_NACK(name: string, group: string, generation: u64, partition: u32) -> OK
async fn s_nack(brokers: &Brokers, r: &mut PayloadReader<'_>) -> (u8, Vec<u8>) {
    let name = match r.read_string() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    let group = match r.read_string() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    let generation = match r.read_u64() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    let partition = match r.read_u32() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    match brokers.stream.nack(&name, &group, generation, partition).await {
        Ok(()) => ok(),
        Err(e) => err(e.to_string()),
    }
}

/// S_SEEK(name: string, group: string, generation: u64, target: u8
/// (0=beginning, 1=end)) -> OK. Repositions every partition the group
/// tracks, not just one -- see `nexo_core::StreamBroker::seek_all`.
async fn s_seek(brokers: &Brokers, r: &mut PayloadReader<'_>) -> (u8, Vec<u8>) {
    let name = match r.read_string() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    let group = match r.read_string() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    let generation = match r.read_u64() {
        Ok(v) => v,
        Err(e) => return bad_frame(e),
    };
    let target = match r.read_u8() {
        Ok(0) => SeekTarget::Beginning,
        Ok(_) => SeekTarget::End,
        Err(e) => return bad_frame(e),
    };
    match brokers.stream.seek_all(&name, &group, generation, target).await {
        Ok(()) => ok(),
        Err(e) => err(e.to_string()),
    }
}
