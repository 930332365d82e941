//! Redis Streams-backed broker (durable, at-least-once delivery).
//!
//! - **Publish**: `XADD` onto a single stream (default `bioforge:jobs`)
//! - **Consume**: `XREADGROUP` within one consumer group shared by all workers
//! - **Redelivery**: entries left unacknowledged longer than `claim_idle` are
//!   taken over with `XPENDING` + `XCLAIM`
//! - **Dead-letter**: rejected entries, and entries delivered more than
//!   `max_deliveries` times, are copied to `<stream>:dlq` and acknowledged
//!
//! Connections are opened lazily and dropped on I/O errors; the next call
//! reconnects. Blocking reads use their own connection so they never stall
//! publishes or acks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, RedisError};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::{Broker, BrokerError, Delivery, DEFAULT_QUEUE_NAME, JobMessage};

const DEFAULT_GROUP: &str = "bioforge-workers";
const DEFAULT_MAX_DELIVERIES: u32 = 5;
const DEFAULT_CLAIM_IDLE: Duration = Duration::from_secs(60);
const RECLAIM_BATCH: usize = 10;

pub struct RedisStreamsBroker {
    client: redis::Client,
    stream_key: String,
    dlq_key: String,
    group: String,
    max_deliveries: u32,
    claim_idle: Duration,
    commands: Mutex<Option<MultiplexedConnection>>,
    blocking: Mutex<Option<MultiplexedConnection>>,
    group_ready: AtomicBool,
}

impl std::fmt::Debug for RedisStreamsBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStreamsBroker")
            .field("stream_key", &self.stream_key)
            .field("group", &self.group)
            .field("max_deliveries", &self.max_deliveries)
            .finish_non_exhaustive()
    }
}

impl RedisStreamsBroker {
    /// Create a broker for `stream_key` (default `bioforge:jobs`).
    ///
    /// No connection is made until the first command.
    pub fn new(redis_url: impl AsRef<str>, stream_key: Option<String>) -> Result<Self, BrokerError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        let stream_key = stream_key.unwrap_or_else(|| DEFAULT_QUEUE_NAME.to_string());

        Ok(Self {
            client,
            dlq_key: format!("{stream_key}:dlq"),
            stream_key,
            group: DEFAULT_GROUP.to_string(),
            max_deliveries: DEFAULT_MAX_DELIVERIES,
            claim_idle: DEFAULT_CLAIM_IDLE,
            commands: Mutex::new(None),
            blocking: Mutex::new(None),
            group_ready: AtomicBool::new(false),
        })
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn with_max_deliveries(mut self, max_deliveries: u32) -> Self {
        self.max_deliveries = max_deliveries.max(1);
        self
    }

    pub fn with_claim_idle(mut self, claim_idle: Duration) -> Self {
        self.claim_idle = claim_idle;
        self
    }

    async fn connection(
        &self,
        slot: &Mutex<Option<MultiplexedConnection>>,
    ) -> Result<MultiplexedConnection, BrokerError> {
        let mut guard = slot.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    /// Classify a command failure, dropping the connection if it is broken.
    async fn command_error(
        &self,
        slot: &Mutex<Option<MultiplexedConnection>>,
        operation: &str,
        err: RedisError,
    ) -> BrokerError {
        if err.code() == Some("NOGROUP") {
            self.group_ready.store(false, Ordering::Release);
        }
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout() {
            slot.lock().await.take();
            return BrokerError::Connection(format!("{operation} failed: {err}"));
        }
        BrokerError::Command(format!("{operation} failed: {err}"))
    }

    /// Create the consumer group (and stream) once; `BUSYGROUP` means it exists.
    async fn ensure_group(&self) -> Result<(), BrokerError> {
        if self.group_ready.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut conn = self.connection(&self.commands).await?;
        let created: Result<(), RedisError> = conn
            .xgroup_create_mkstream(&self.stream_key, &self.group, "0")
            .await;
        match created {
            Ok(()) => info!(stream = %self.stream_key, group = %self.group, "consumer group created"),
            Err(e) if e.code() == Some("BUSYGROUP") => {}
            Err(e) => return Err(self.command_error(&self.commands, "XGROUP CREATE", e).await),
        }
        self.group_ready.store(true, Ordering::Release);
        Ok(())
    }

    /// Take over one entry another consumer left unacknowledged for too long.
    async fn reclaim_idle(&self, consumer: &str) -> Result<Option<Delivery>, BrokerError> {
        let mut conn = self.connection(&self.commands).await?;
        let pending: StreamPendingCountReply = match conn
            .xpending_count(&self.stream_key, &self.group, "-", "+", RECLAIM_BATCH)
            .await
        {
            Ok(reply) => reply,
            Err(e) => return Err(self.command_error(&self.commands, "XPENDING", e).await),
        };

        let idle_ms = self.claim_idle.as_millis() as usize;
        for entry in pending.ids.into_iter().filter(|p| p.last_delivered_ms >= idle_ms) {
            let claimed: StreamClaimReply = match conn
                .xclaim(&self.stream_key, &self.group, consumer, idle_ms, &[&entry.id])
                .await
            {
                Ok(reply) => reply,
                Err(e) => return Err(self.command_error(&self.commands, "XCLAIM", e).await),
            };
            let Some(stream_entry) = claimed.ids.into_iter().next() else {
                continue;
            };

            let attempt = u32::try_from(entry.times_delivered).unwrap_or(u32::MAX).saturating_add(1);
            match parse_entry(&stream_entry, attempt) {
                Ok(delivery) if attempt > self.max_deliveries => {
                    let reason = format!("exceeded {} deliveries", self.max_deliveries);
                    self.reject(&delivery, &reason).await?;
                }
                Ok(delivery) => {
                    debug!(delivery_id = %delivery.id, attempt, "reclaimed idle entry");
                    return Ok(Some(delivery));
                }
                Err(e) => {
                    warn!(entry_id = %stream_entry.id, error = %e, "dropping unreadable stream entry");
                    self.dead_letter_raw(&stream_entry.id, attempt, &e.to_string(), "").await?;
                }
            }
        }
        Ok(None)
    }

    async fn read_new(&self, consumer: &str, block: Duration) -> Result<Option<Delivery>, BrokerError> {
        let mut conn = self.connection(&self.blocking).await?;
        let options = StreamReadOptions::default()
            .group(&self.group, consumer)
            .count(1)
            .block((block.as_millis() as usize).max(1));

        let reply: Option<StreamReadReply> = match conn
            .xread_options(&[&self.stream_key], &[">"], &options)
            .await
        {
            Ok(reply) => reply,
            Err(e) => return Err(self.command_error(&self.blocking, "XREADGROUP", e).await),
        };

        let Some(entry) = reply
            .into_iter()
            .flat_map(|r| r.keys)
            .flat_map(|k| k.ids)
            .next()
        else {
            return Ok(None);
        };

        match parse_entry(&entry, 1) {
            Ok(delivery) => Ok(Some(delivery)),
            Err(e) => {
                warn!(entry_id = %entry.id, error = %e, "dropping unreadable stream entry");
                self.dead_letter_raw(&entry.id, 1, &e.to_string(), "").await?;
                Ok(None)
            }
        }
    }

    /// Copy an entry to the dead-letter stream and acknowledge the original.
    async fn dead_letter_raw(
        &self,
        entry_id: &str,
        attempt: u32,
        reason: &str,
        payload: &str,
    ) -> Result<(), BrokerError> {
        let mut conn = self.connection(&self.commands).await?;
        let attempt = attempt.to_string();
        let failed_at = chrono::Utc::now().to_rfc3339();
        let fields = [
            ("original_id", entry_id),
            ("attempt", attempt.as_str()),
            ("reason", reason),
            ("failed_at", failed_at.as_str()),
            ("payload", payload),
        ];
        let added: Result<String, RedisError> = conn.xadd(&self.dlq_key, "*", &fields).await;
        if let Err(e) = added {
            return Err(self.command_error(&self.commands, "DLQ XADD", e).await);
        }
        self.ack_id(entry_id).await
    }

    async fn ack_id(&self, entry_id: &str) -> Result<(), BrokerError> {
        let mut conn = self.connection(&self.commands).await?;
        let acked: Result<i64, RedisError> = conn.xack(&self.stream_key, &self.group, &[entry_id]).await;
        match acked {
            Ok(_) => Ok(()),
            Err(e) => Err(self.command_error(&self.commands, "XACK", e).await),
        }
    }
}

fn parse_entry(entry: &StreamId, attempt: u32) -> Result<Delivery, BrokerError> {
    let payload: String = entry
        .get("payload")
        .ok_or_else(|| BrokerError::Deserialization(format!("entry {} has no payload", entry.id)))?;
    let message: JobMessage = serde_json::from_str(&payload)
        .map_err(|e| BrokerError::Deserialization(format!("entry {}: {e}", entry.id)))?;
    Ok(Delivery {
        id: entry.id.clone(),
        message,
        attempt,
    })
}

#[async_trait::async_trait]
impl Broker for RedisStreamsBroker {
    #[instrument(skip(self, message), fields(stream_key = %self.stream_key, job_id = %message.job_id), err)]
    async fn publish(&self, message: &JobMessage) -> Result<(), BrokerError> {
        let payload =
            serde_json::to_string(message).map_err(|e| BrokerError::Serialization(e.to_string()))?;
        let job_id = message.job_id.to_string();

        let mut conn = self.connection(&self.commands).await?;
        let added: Result<String, RedisError> = conn
            .xadd(
                &self.stream_key,
                "*",
                &[("job_id", job_id.as_str()), ("payload", payload.as_str())],
            )
            .await;
        match added {
            Ok(entry_id) => {
                debug!(entry_id = %entry_id, "job message appended");
                Ok(())
            }
            Err(e) => Err(self.command_error(&self.commands, "XADD", e).await),
        }
    }

    async fn receive(&self, consumer: &str, block: Duration) -> Result<Option<Delivery>, BrokerError> {
        self.ensure_group().await?;
        if let Some(delivery) = self.reclaim_idle(consumer).await? {
            return Ok(Some(delivery));
        }
        self.read_new(consumer, block).await
    }

    #[instrument(skip(self, delivery), fields(delivery_id = %delivery.id), err)]
    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.ack_id(&delivery.id).await
    }

    #[instrument(skip(self, delivery), fields(delivery_id = %delivery.id, job_id = %delivery.message.job_id), err)]
    async fn reject(&self, delivery: &Delivery, reason: &str) -> Result<(), BrokerError> {
        let payload = serde_json::to_string(&delivery.message)
            .map_err(|e| BrokerError::Serialization(e.to_string()))?;
        self.dead_letter_raw(&delivery.id, delivery.attempt, reason, &payload)
            .await?;
        warn!(attempt = delivery.attempt, reason, "message sent to dead-letter stream");
        Ok(())
    }

    async fn release(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        debug!(
            delivery_id = %delivery.id,
            claim_after_ms = self.claim_idle.as_millis() as u64,
            "delivery left pending for reclaim"
        );
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "redis-streams"
    }
}
