//! Status poller: wait for a job to reach a terminal state.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use bioforge_core::JobId;

use super::store::{JobStore, JobStoreError};
use super::types::JobStatus;

/// Terminal result of a job.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Completed(JsonValue),
    Failed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("job lookup failed: {0}")]
    Lookup(#[source] JobStoreError),

    #[error("job {job_id} not finished after {}s", .waited.as_secs())]
    TimedOut { job_id: JobId, waited: Duration },

    #[error("stopped waiting for job {0}")]
    Cancelled(JobId),
}

/// Polls the job store at a fixed interval, bounded by `max_wait`.
#[derive(Clone)]
pub struct StatusPoller {
    store: Arc<dyn JobStore>,
    interval: Duration,
    max_wait: Duration,
}

impl std::fmt::Debug for StatusPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusPoller")
            .field("interval", &self.interval)
            .field("max_wait", &self.max_wait)
            .finish_non_exhaustive()
    }
}

impl StatusPoller {
    pub fn new(store: Arc<dyn JobStore>, interval: Duration, max_wait: Duration) -> Self {
        Self {
            store,
            interval,
            max_wait,
        }
    }

    /// Same poller with a different upper bound.
    pub fn with_max_wait(&self, max_wait: Duration) -> Self {
        Self {
            max_wait,
            ..self.clone()
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    /// Wait until the job completes or fails.
    pub async fn wait_for(
        &self,
        job_id: JobId,
        cancel: &CancellationToken,
    ) -> Result<PollOutcome, PollError> {
        self.wait_observed(job_id, cancel, |_| {}).await
    }

    /// Like [`StatusPoller::wait_for`], reporting every status change to `observe`.
    pub async fn wait_observed<F>(
        &self,
        job_id: JobId,
        cancel: &CancellationToken,
        mut observe: F,
    ) -> Result<PollOutcome, PollError>
    where
        F: FnMut(JobStatus) + Send,
    {
        let started = Instant::now();
        let deadline = started + self.max_wait;
        let mut last: Option<JobStatus> = None;

        loop {
            if cancel.is_cancelled() {
                return Err(PollError::Cancelled(job_id));
            }

            let job = self
                .store
                .get(job_id)
                .await
                .map_err(PollError::Lookup)?
                .ok_or(PollError::NotFound(job_id))?;

            if last != Some(job.status) {
                debug!(%job_id, status = %job.status, "job status observed");
                observe(job.status);
                last = Some(job.status);
            }

            match job.status {
                JobStatus::Completed => {
                    return Ok(PollOutcome::Completed(job.result_data.unwrap_or(JsonValue::Null)));
                }
                JobStatus::Failed => {
                    return Ok(PollOutcome::Failed(
                        job.error_message.unwrap_or_else(|| "unknown error".to_string()),
                    ));
                }
                JobStatus::Pending | JobStatus::Processing => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(PollError::TimedOut {
                    job_id,
                    waited: now - started,
                });
            }

            let tick = self.interval.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => return Err(PollError::Cancelled(job_id)),
                _ = tokio::time::sleep(tick) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use bioforge_core::{JobType, UserId};

    use super::*;
    use crate::jobs::store::InMemoryJobStore;
    use crate::jobs::types::NewJob;

    async fn pending_job(store: &InMemoryJobStore) -> JobId {
        store
            .insert(NewJob::new(JobType::Generate, UserId::new(1), json!({"inspiration": "ants"})))
            .await
            .unwrap()
            .id
    }

    fn poller(store: Arc<InMemoryJobStore>, max_wait: Duration) -> StatusPoller {
        StatusPoller::new(store, Duration::from_millis(5), max_wait)
    }

    #[tokio::test]
    async fn returns_result_of_completed_job() {
        let store = Arc::new(InMemoryJobStore::new());
        let id = pending_job(&store).await;

        let worker = {
            let store = store.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                store.claim(id).await.unwrap();
                tokio::time::sleep(Duration::from_millis(20)).await;
                store.complete(id, json!({"score": 80})).await.unwrap();
            })
        };

        let mut seen = Vec::new();
        let outcome = poller(store, Duration::from_secs(5))
            .wait_observed(id, &CancellationToken::new(), |s| seen.push(s))
            .await
            .unwrap();
        worker.await.unwrap();

        assert_eq!(outcome, PollOutcome::Completed(json!({"score": 80})));
        assert_eq!(seen.first(), Some(&JobStatus::Pending));
        assert_eq!(seen.last(), Some(&JobStatus::Completed));
    }

    #[tokio::test]
    async fn returns_error_message_of_failed_job() {
        let store = Arc::new(InMemoryJobStore::new());
        let id = pending_job(&store).await;
        store.claim(id).await.unwrap();
        store.fail(id, "AI rate limit exceeded: slow down").await.unwrap();

        let outcome = poller(store, Duration::from_secs(1))
            .wait_for(id, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, PollOutcome::Failed("AI rate limit exceeded: slow down".to_string()));
    }

    #[tokio::test]
    async fn unknown_job_stops_immediately() {
        let store = Arc::new(InMemoryJobStore::new());
        let err = poller(store, Duration::from_secs(1))
            .wait_for(JobId::new(404), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PollError::NotFound(id) if id == JobId::new(404)));
    }

    #[tokio::test]
    async fn gives_up_after_max_wait() {
        let store = Arc::new(InMemoryJobStore::new());
        let id = pending_job(&store).await;

        let err = poller(store, Duration::from_millis(30))
            .wait_for(id, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PollError::TimedOut { job_id, .. } if job_id == id));
    }

    #[tokio::test]
    async fn cancellation_stops_waiting() {
        let store = Arc::new(InMemoryJobStore::new());
        let id = pending_job(&store).await;
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                cancel.cancel();
            })
        };

        let err = poller(store, Duration::from_secs(10))
            .wait_for(id, &cancel)
            .await
            .unwrap_err();
        canceller.await.unwrap();
        assert!(matches!(err, PollError::Cancelled(_)));
    }
}
