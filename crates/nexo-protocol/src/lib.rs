//! nexo-protocol: wire frame codec and positional payload types.
//!
//! No networking code lives here -- this crate is pure encode/decode, the
//! binary-wire counterpart of what `serde`-derived message structs give a
//! JSON-over-websocket protocol. Connection handling lives in the server
//! binary; this crate only knows how to turn bytes into [`frame::Frame`]s
//! and back.

pub mod error;
pub mod frame;
pub mod opcodes;
pub mod payload;

pub use error::FrameError;
pub use frame::{decode_frame, encode_push, encode_request, encode_response, DecodeOutcome, Frame, FrameType, DEFAULT_MAX_PAYLOAD_LEN, HEADER_LEN};
pub use payload::{AnyValue, DataType, PayloadReader, PayloadWriter};
