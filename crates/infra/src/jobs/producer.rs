//! Producer: validate, record, then publish.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{info, instrument, warn};

use bioforge_ai::JobInput;
use bioforge_core::{JobId, JobType, UserId};

use crate::broker::{Broker, BrokerError, JobMessage, ReconnectPolicy};

use super::runner::{JobRunner, RunError};
use super::store::{JobStore, JobStoreError};
use super::types::{JobRecord, NewJob};

/// How the job left the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    /// Handed to the broker.
    Published,
    /// Recorded but not published; the recovery sweep will republish it.
    Deferred,
    /// No broker: the job already ran to a terminal state on the enqueue path.
    Inline,
}

/// Returned by [`Producer::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueReceipt {
    pub job_id: JobId,
    pub delivery: DeliveryState,
}

#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] JobStoreError),
}

enum Dispatch {
    Queued {
        broker: Arc<dyn Broker>,
        retry: ReconnectPolicy,
    },
    Inline(JobRunner),
}

/// Creates job records and hands them to the broker (or runs them inline).
pub struct Producer {
    store: Arc<dyn JobStore>,
    dispatch: Dispatch,
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("queued", &self.is_queued())
            .finish_non_exhaustive()
    }
}

impl Producer {
    /// Publish through `broker`, retrying each publish per `retry`.
    pub fn queued(store: Arc<dyn JobStore>, broker: Arc<dyn Broker>, retry: ReconnectPolicy) -> Self {
        Self {
            store,
            dispatch: Dispatch::Queued { broker, retry },
        }
    }

    /// Run every job inline with `runner` (broker disabled).
    pub fn inline(store: Arc<dyn JobStore>, runner: JobRunner) -> Self {
        Self {
            store,
            dispatch: Dispatch::Inline(runner),
        }
    }

    pub fn is_queued(&self) -> bool {
        matches!(self.dispatch, Dispatch::Queued { .. })
    }

    /// Validate and record a job, then deliver it.
    ///
    /// Broker trouble never fails this call: the job is recorded first and
    /// reported as [`DeliveryState::Deferred`] if publishing gives up.
    #[instrument(skip(self, input_data), fields(user_id = %user_id), err)]
    pub async fn enqueue(
        &self,
        job_type: &str,
        input_data: JsonValue,
        user_id: UserId,
    ) -> Result<EnqueueReceipt, ProducerError> {
        let job_type: JobType = job_type
            .parse()
            .map_err(|e: bioforge_core::DomainError| ProducerError::Validation(e.to_string()))?;
        JobInput::parse(job_type, &input_data).map_err(|e| ProducerError::Validation(e.to_string()))?;

        let record = self
            .store
            .insert(NewJob::new(job_type, user_id, input_data))
            .await?;
        let message = JobMessage::from(&record);

        let delivery = match &self.dispatch {
            Dispatch::Queued { broker, retry } => {
                match publish_with_retry(broker.as_ref(), retry, &message).await {
                    Ok(()) => DeliveryState::Published,
                    Err(e) => {
                        warn!(
                            job_id = %record.id,
                            error = %e,
                            "publish failed; job stays pending for republish"
                        );
                        DeliveryState::Deferred
                    }
                }
            }
            Dispatch::Inline(runner) => match runner.run(&message).await {
                Ok(_) | Err(RunError::Processor(_)) => DeliveryState::Inline,
                Err(RunError::Store(e)) => return Err(ProducerError::Store(e)),
            },
        };

        info!(job_id = %record.id, job_type = %job_type, ?delivery, "job enqueued");
        Ok(EnqueueReceipt {
            job_id: record.id,
            delivery,
        })
    }

    /// Publish an existing pending job again (single attempt).
    ///
    /// Returns `Ok(false)` when there is no broker to publish to.
    pub async fn republish(&self, record: &JobRecord) -> Result<bool, BrokerError> {
        match &self.dispatch {
            Dispatch::Queued { broker, .. } => {
                broker.publish(&JobMessage::from(record)).await?;
                Ok(true)
            }
            Dispatch::Inline(_) => Ok(false),
        }
    }
}

async fn publish_with_retry(
    broker: &dyn Broker,
    retry: &ReconnectPolicy,
    message: &JobMessage,
) -> Result<(), BrokerError> {
    let mut attempts: u32 = 0;
    loop {
        match broker.publish(message).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                attempts += 1;
                if !retry.should_retry(attempts) {
                    return Err(e);
                }
                let delay = retry.delay_for_attempt(attempts);
                warn!(
                    job_id = %message.job_id,
                    attempt = attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %e,
                    "publish failed; retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
