use thiserror::Error;

/// KV broker errors. Currently there are no failure modes beyond absence,
/// which is modeled as `Option::None` rather than an error -- this enum
/// exists for symmetry with the other three brokers and room to grow.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum KvError {}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum PubSubError {
    #[error("pattern '{0}' is invalid: '#' is only valid as the last segment")]
    InvalidPattern(String),
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum QueueError {
    #[error("queue '{0}' not found")]
    NotFound(String),
    #[error("queue '{0}' already exists")]
    AlreadyExists(String),
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum StreamError {
    #[error("stream '{0}' not found")]
    NotFound(String),
    #[error("stream '{0}' already exists")]
    AlreadyExists(String),
    #[error("consumer group '{group}' on stream '{topic}' not found")]
    GroupNotFound { topic: String, group: String },
    #[error("partition {0} out of range")]
    InvalidPartition(u32),
    #[error("FENCED")]
    Fenced,
    #[error("REBALANCE")]
    Rebalance,
}
