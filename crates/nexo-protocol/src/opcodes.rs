//! Opcode, status, and push-kind byte constants.
//!
//! Ranges are disjoint per broker so the dispatcher can route on a single
//! byte without inspecting the payload: `0x00` debug-echo, `0x02-0x05` KV,
//! `0x10-0x1F` Queue, `0x20-0x2F` PubSub, `0x30-0x3F` Stream.

/// Debug echo: request body is returned verbatim as the response body.
pub const OP_ECHO: u8 = 0x00;

pub const OP_KV_SET: u8 = 0x02;
pub const OP_KV_GET: u8 = 0x03;
pub const OP_KV_DEL: u8 = 0x04;

pub const OP_Q_CREATE: u8 = 0x10;
pub const OP_Q_PUSH: u8 = 0x11;
pub const OP_Q_CONSUME: u8 = 0x12;
pub const OP_Q_ACK: u8 = 0x13;
pub const OP_Q_NACK: u8 = 0x14;
pub const OP_Q_PEEK_DLQ: u8 = 0x15;
pub const OP_Q_MOVE_TO_QUEUE: u8 = 0x16;
pub const OP_Q_DELETE_DLQ: u8 = 0x17;
pub const OP_Q_PURGE_DLQ: u8 = 0x18;

pub const OP_SUB: u8 = 0x20;
pub const OP_UNSUB: u8 = 0x21;
pub const OP_PUB: u8 = 0x22;

pub const OP_S_CREATE: u8 = 0x30;
pub const OP_S_PUB: u8 = 0x31;
pub const OP_S_JOIN: u8 = 0x32;
pub const OP_S_FETCH: u8 = 0x33;
pub const OP_S_ACK: u8 = 0x34;
pub const OP_S_COMMIT: u8 = 0x35;
pub const OP_S_NACK: u8 = 0x36;
pub const OP_S_SEEK: u8 = 0x37;

/// Response status bytes.
pub mod status {
    pub const OK: u8 = 0x00;
    pub const ERR: u8 = 0x01;
    pub const NULL: u8 = 0x02;
    pub const DATA: u8 = 0x03;
}

/// Push-frame kind bytes.
pub mod push_kind {
    pub const PUBSUB: u8 = 0x01;
}

/// Well-known `ERR` body tokens the SDK layer matches on to suppress
/// logging. The server's only obligation is to emit these byte-exact.
pub mod error_tokens {
    pub const FENCED: &str = "FENCED";
    pub const REBALANCE: &str = "REBALANCE";
}
