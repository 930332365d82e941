//! Queue broker: at-least-once delivery of job messages.
//!
//! The broker only carries job ids and the data needed to run them. Job
//! state lives in the job store; a message that arrives twice is absorbed by
//! the store's claim.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use bioforge_core::{JobId, JobType, UserId};

use crate::jobs::JobRecord;

pub mod backoff;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_streams;

pub use backoff::ReconnectPolicy;
pub use memory::{DeadLetter, InMemoryBroker};
#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamsBroker;

/// Default channel (stream key) name.
pub const DEFAULT_QUEUE_NAME: &str = "bioforge:jobs";

/// Message published for every job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMessage {
    pub job_id: JobId,
    pub user_id: UserId,
    pub job_type: JobType,
    pub input_data: JsonValue,
}

impl From<&JobRecord> for JobMessage {
    fn from(record: &JobRecord) -> Self {
        Self {
            job_id: record.id,
            user_id: record.user_id,
            job_type: record.job_type,
            input_data: record.input_data.clone(),
        }
    }
}

/// A message handed to one consumer, pending acknowledgement.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Broker-specific delivery id (stream entry id for Redis).
    pub id: String,
    pub message: JobMessage,
    /// 1 for the first delivery, incremented on every redelivery.
    pub attempt: u32,
}

/// Broker error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("broker command error: {0}")]
    Command(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("broker is closed")]
    Closed,
}

/// Durable, at-least-once message channel.
#[async_trait::async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Append a message to the channel.
    async fn publish(&self, message: &JobMessage) -> Result<(), BrokerError>;

    /// Wait up to `block` for the next message for `consumer`.
    async fn receive(&self, consumer: &str, block: Duration) -> Result<Option<Delivery>, BrokerError>;

    /// The delivery was handled; never redeliver it.
    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError>;

    /// The delivery failed terminally; record it as dead-lettered and acknowledge it.
    async fn reject(&self, delivery: &Delivery, reason: &str) -> Result<(), BrokerError>;

    /// Give the delivery up without acknowledging it, so it is redelivered later.
    async fn release(&self, delivery: &Delivery) -> Result<(), BrokerError>;

    /// Short implementation name for logs.
    fn kind(&self) -> &'static str;
}
