use thiserror::Error;

/// Codec-level failures. These are never surfaced to the application: a
/// `BadFrame`-class error closes the connection after being logged, it
/// never becomes an `ERR` response.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum FrameError {
    #[error("frame header or payload truncated")]
    Truncated,

    #[error("declared payload length {0} exceeds the configured maximum")]
    PayloadTooLarge(u32),

    #[error("string length {len} exceeds remaining payload bytes {remaining}")]
    BadStringLength { len: usize, remaining: usize },

    #[error("invalid frame type byte {0:#x}")]
    InvalidFrameType(u8),

    #[error("invalid any-value data type tag {0:#x}")]
    InvalidDataType(u8),

    #[error("payload bytes are not valid UTF-8")]
    InvalidUtf8,
}
