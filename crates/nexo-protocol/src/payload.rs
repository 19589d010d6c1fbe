//! Positional payload encoding.
//!
//! The wire format has no self-describing schema: each opcode documents a
//! fixed, positional order of primitives (`u8`, `u32 BE`, `u64 BE`, `uuid`,
//! `string`, `any`). [`PayloadWriter`] and [`PayloadReader`] are the
//! structural counterpart of what `serde` gives a JSON message -- here
//! they ARE the schema.

use crate::error::FrameError;
use uuid::Uuid;

/// Tag byte for the `any` type, always positionally last in a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Raw = 0,
    String = 1,
    Json = 2,
}

impl DataType {
    pub fn from_tag(tag: u8) -> Result<Self, FrameError> {
        match tag {
            0 => Ok(DataType::Raw),
            1 => Ok(DataType::String),
            2 => Ok(DataType::Json),
            other => Err(FrameError::InvalidDataType(other)),
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }
}

/// A tagged dynamic value: `Raw(bytes)`, `String(utf8 text)`, or
/// `Json(utf8 json text)`. Mirrors the sum type `{ Raw, String, Json }`
/// that the wire-level `u8 type-tag + trailing bytes` encodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnyValue {
    Raw(Vec<u8>),
    String(String),
    Json(Vec<u8>),
}

impl AnyValue {
    pub fn data_type(&self) -> DataType {
        match self {
            AnyValue::Raw(_) => DataType::Raw,
            AnyValue::String(_) => DataType::String,
            AnyValue::Json(_) => DataType::Json,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            AnyValue::Raw(b) | AnyValue::Json(b) => b,
            AnyValue::String(s) => s.as_bytes(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    pub fn from_parts(data_type: DataType, bytes: Vec<u8>) -> Result<Self, FrameError> {
        match data_type {
            DataType::Raw => Ok(AnyValue::Raw(bytes)),
            DataType::Json => Ok(AnyValue::Json(bytes)),
            DataType::String => {
                let s = String::from_utf8(bytes).map_err(|_| FrameError::InvalidUtf8)?;
                Ok(AnyValue::String(s))
            }
        }
    }
}

/// Append-only positional payload builder.
#[derive(Debug, Default)]
pub struct PayloadWriter {
    buf: Vec<u8>,
}

impl PayloadWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn write_u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn write_u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn write_u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn write_uuid(&mut self, v: Uuid) -> &mut Self {
        self.buf.extend_from_slice(v.as_bytes());
        self
    }

    pub fn write_string(&mut self, v: &str) -> &mut Self {
        self.write_u32(v.len() as u32);
        self.buf.extend_from_slice(v.as_bytes());
        self
    }

    pub fn write_bytes_raw(&mut self, v: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(v);
        self
    }

    /// `any` is always positionally last: tag byte + remaining bytes.
    pub fn write_any(&mut self, v: &AnyValue) -> &mut Self {
        self.write_u8(v.data_type().tag());
        self.buf.extend_from_slice(v.as_bytes());
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over a positional payload, the read-side counterpart of
/// [`PayloadWriter`]. Every read method advances the cursor and fails with
/// [`FrameError::Truncated`] if not enough bytes remain.
pub struct PayloadReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], FrameError> {
        if self.remaining() < n {
            return Err(FrameError::Truncated);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Reads exactly `n` raw bytes. Used by callers that frame their own
    /// length-prefixed sub-values (e.g. a list of `any`s, which can't rely
    /// on the "last field" rule [`Self::read_any`] uses).
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], FrameError> {
        self.take(n)
    }

    pub fn read_u8(&mut self) -> Result<u8, FrameError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u32(&mut self) -> Result<u32, FrameError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64, FrameError> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_be_bytes(arr))
    }

    pub fn read_uuid(&mut self) -> Result<Uuid, FrameError> {
        let b = self.take(16)?;
        let mut arr = [0u8; 16];
        arr.copy_from_slice(b);
        Ok(Uuid::from_bytes(arr))
    }

    pub fn read_string(&mut self) -> Result<String, FrameError> {
        let len = self.read_u32()? as usize;
        if len > self.remaining() {
            return Err(FrameError::BadStringLength { len, remaining: self.remaining() });
        }
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| FrameError::InvalidUtf8)
    }

    /// Reads the remaining buffer tail as an `any` value. Must be called
    /// last, matching the wire invariant that `any` is positionally last.
    pub fn read_any(&mut self) -> Result<AnyValue, FrameError> {
        let tag = self.read_u8()?;
        let data_type = DataType::from_tag(tag)?;
        let rest = self.buf[self.pos..].to_vec();
        self.pos = self.buf.len();
        AnyValue::from_parts(data_type, rest)
    }

    /// Returns true if every byte of the payload has been consumed.
    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }
}
