//! Runs one job: claim, process, record the terminal state.
//!
//! Shared by the worker pool and by the producer's inline (broker-less) mode.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};

use bioforge_ai::{JobProcessor, ProcessorError};

use crate::broker::{JobMessage, ReconnectPolicy};

use super::store::{JobStore, JobStoreError};
use super::types::{ClaimOutcome, JobRecord, JobStatus};

/// Outcome of a run that did not hit an error.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(JobRecord),
    /// Duplicate or stale delivery; the job was not touched.
    /// `None` means the job does not exist.
    Skipped(Option<JobStatus>),
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The job record could not be read or written.
    #[error(transparent)]
    Store(#[from] JobStoreError),

    /// The processor failed; the record has already been marked failed.
    #[error("job processor failed: {0}")]
    Processor(#[source] ProcessorError),
}

/// Executes jobs against a store with a processor.
#[derive(Clone)]
pub struct JobRunner {
    store: Arc<dyn JobStore>,
    processor: Arc<dyn JobProcessor>,
    write_retry: ReconnectPolicy,
}

impl std::fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRunner").finish_non_exhaustive()
    }
}

impl JobRunner {
    pub fn new(store: Arc<dyn JobStore>, processor: Arc<dyn JobProcessor>) -> Self {
        Self {
            store,
            processor,
            write_retry: ReconnectPolicy::bounded(4, Duration::from_millis(100), Duration::from_secs(2)),
        }
    }

    /// Retry policy for the terminal write after a storage error.
    pub fn with_write_retry(mut self, policy: ReconnectPolicy) -> Self {
        self.write_retry = policy;
        self
    }

    /// Run the job named by `message`.
    ///
    /// The claimed record, not the message, is the source of truth for the
    /// job's type and input.
    #[instrument(skip(self, message), fields(job_id = %message.job_id, job_type = %message.job_type))]
    pub async fn run(&self, message: &JobMessage) -> Result<RunOutcome, RunError> {
        let job = match self.store.claim(message.job_id).await? {
            ClaimOutcome::Claimed(job) => job,
            ClaimOutcome::AlreadyClaimed(status) => {
                debug!(%status, "job already claimed; skipping delivery");
                return Ok(RunOutcome::Skipped(Some(status)));
            }
            ClaimOutcome::NotFound => {
                warn!("message refers to an unknown job; skipping delivery");
                return Ok(RunOutcome::Skipped(None));
            }
        };

        let store = &self.store;
        let id = job.id;
        match self
            .processor
            .process(job.job_type, &job.input_data, job.user_id)
            .await
        {
            Ok(result) => {
                let record = self
                    .write_terminal("complete", move || store.complete(id, result.clone()))
                    .await?;
                info!("job completed");
                Ok(RunOutcome::Completed(record))
            }
            Err(err) => {
                let message = err.to_string();
                warn!(error = %message, "job failed");
                let reason = message.as_str();
                if let Err(e) = self.write_terminal("fail", move || store.fail(id, reason)).await {
                    error!(error = %e, processor_error = %message, "could not record job failure");
                    return Err(e.into());
                }
                Err(RunError::Processor(err))
            }
        }
    }

    /// Write a terminal state, retrying storage errors.
    ///
    /// Redeliveries skip a claimed job, so this runner is the only writer of
    /// its outcome.
    async fn write_terminal<F, Fut>(&self, op: &'static str, mut write: F) -> Result<JobRecord, JobStoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<JobRecord, JobStoreError>>,
    {
        let mut attempts: u32 = 0;
        loop {
            match write().await {
                Err(JobStoreError::Storage(reason)) => {
                    attempts += 1;
                    if !self.write_retry.should_retry(attempts) {
                        return Err(JobStoreError::Storage(reason));
                    }
                    let delay = self.write_retry.delay_for_attempt(attempts);
                    warn!(
                        op,
                        attempt = attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %reason,
                        "terminal write failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}
