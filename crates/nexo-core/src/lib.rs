//! Broker state machines and background sweepers for Nexo (C4-C7, C9).
//!
//! This crate has no socket code. Brokers are plain structs exposing async
//! methods behind `tokio::sync::RwLock`, meant to be wrapped in an `Arc` and
//! shared between the connection tasks and sweepers that `services/nexo-server`
//! wires up.

pub mod error;
pub mod ids;
pub mod kv;
pub mod pubsub;
pub mod queue;
pub mod scheduler;
pub mod snapshot;
pub mod stream;

pub use error::{KvError, PubSubError, QueueError, StreamError};
pub use ids::ConnId;
pub use kv::KvBroker;
pub use pubsub::{Pattern, PubSubBroker};
pub use queue::{Persistence, QueueBroker, QueueConfig};
pub use scheduler::{
    spawn_kv_ttl_sweeper, spawn_queue_delay_sweeper, spawn_queue_ttl_sweeper, spawn_queue_visibility_sweeper,
    spawn_stream_retention_sweeper, SweepConfig,
};
pub use stream::{RetentionConfig, SeekTarget, StreamBroker};
