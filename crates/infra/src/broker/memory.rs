//! Single-process broker for tests/dev and for running without Redis.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::{debug, warn};

use super::{Broker, BrokerError, Delivery, JobMessage};

/// A rejected delivery.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub delivery: Delivery,
    pub reason: String,
    pub dead_lettered_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    queue: VecDeque<Delivery>,
    in_flight: HashMap<String, Delivery>,
    dead_letters: Vec<DeadLetter>,
    next_seq: u64,
    closed: bool,
}

/// FIFO broker with in-flight tracking.
///
/// Released deliveries go back to the front of the queue. Deliveries whose
/// consumer vanished stay in flight until [`InMemoryBroker::requeue_in_flight`]
/// reclaims them, mirroring an idle stream entry.
#[derive(Debug, Default)]
pub struct InMemoryBroker {
    state: Mutex<State>,
    notify: Notify,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, BrokerError> {
        self.state
            .lock()
            .map_err(|_| BrokerError::Command("broker state lock poisoned".to_string()))
    }

    fn try_take(&self) -> Result<Option<Delivery>, BrokerError> {
        let mut state = self.state()?;
        if state.closed {
            return Err(BrokerError::Closed);
        }
        let Some(delivery) = state.queue.pop_front() else {
            return Ok(None);
        };
        state.in_flight.insert(delivery.id.clone(), delivery.clone());
        Ok(Some(delivery))
    }

    /// Move every unacknowledged delivery back to the front of the queue.
    pub fn requeue_in_flight(&self) -> usize {
        let Ok(mut state) = self.state() else {
            return 0;
        };
        let mut pending: Vec<Delivery> = state.in_flight.drain().map(|(_, d)| d).collect();
        pending.sort_by(|a, b| b.id.cmp(&a.id));
        let count = pending.len();
        for mut delivery in pending {
            delivery.attempt += 1;
            state.queue.push_front(delivery);
        }
        drop(state);

        for _ in 0..count {
            self.notify.notify_one();
        }
        count
    }

    /// Stop delivering; further calls return [`BrokerError::Closed`].
    pub fn close(&self) {
        if let Ok(mut state) = self.state() {
            state.closed = true;
        }
        self.notify.notify_waiters();
    }

    pub fn reopen(&self) {
        if let Ok(mut state) = self.state() {
            state.closed = false;
        }
    }

    /// Messages waiting for a consumer.
    pub fn depth(&self) -> usize {
        self.state().map(|s| s.queue.len()).unwrap_or(0)
    }

    /// Deliveries handed out but not yet acknowledged.
    pub fn in_flight(&self) -> usize {
        self.state().map(|s| s.in_flight.len()).unwrap_or(0)
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state().map(|s| s.dead_letters.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, message: &JobMessage) -> Result<(), BrokerError> {
        {
            let mut state = self.state()?;
            if state.closed {
                return Err(BrokerError::Closed);
            }
            state.next_seq += 1;
            let id = format!("{:020}", state.next_seq);
            state.queue.push_back(Delivery {
                id,
                message: message.clone(),
                attempt: 1,
            });
        }
        self.notify.notify_one();
        debug!(job_id = %message.job_id, "message published");
        Ok(())
    }

    async fn receive(&self, _consumer: &str, block: Duration) -> Result<Option<Delivery>, BrokerError> {
        let deadline = tokio::time::Instant::now() + block;
        loop {
            let notified = self.notify.notified();
            if let Some(delivery) = self.try_take()? {
                return Ok(Some(delivery));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.state()?.in_flight.remove(&delivery.id);
        Ok(())
    }

    async fn reject(&self, delivery: &Delivery, reason: &str) -> Result<(), BrokerError> {
        let mut state = self.state()?;
        state.in_flight.remove(&delivery.id);
        state.dead_letters.push(DeadLetter {
            delivery: delivery.clone(),
            reason: reason.to_string(),
            dead_lettered_at: Utc::now(),
        });
        warn!(
            delivery_id = %delivery.id,
            job_id = %delivery.message.job_id,
            reason,
            "message dead-lettered"
        );
        Ok(())
    }

    async fn release(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        {
            let mut state = self.state()?;
            let Some(mut released) = state.in_flight.remove(&delivery.id) else {
                return Ok(());
            };
            released.attempt += 1;
            state.queue.push_front(released);
        }
        self.notify.notify_one();
        debug!(delivery_id = %delivery.id, "delivery released for redelivery");
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
