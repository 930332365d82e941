//! Store doubles shared by unit and pipeline tests.

use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use bioforge_core::JobId;

use super::store::{InMemoryJobStore, JobStore, JobStoreError};
use super::types::{ClaimOutcome, JobRecord, JobStats, JobStatus, NewJob};

/// In-memory store whose claim and terminal writes fail a set number of times.
#[derive(Debug, Default)]
pub(crate) struct FlakyStore {
    pub(crate) inner: InMemoryJobStore,
    pub(crate) claim_failures: AtomicU32,
    pub(crate) complete_failures: AtomicU32,
    pub(crate) fail_failures: AtomicU32,
}

impl FlakyStore {
    pub(crate) fn failing_claim(times: u32) -> Self {
        let store = Self::default();
        store.claim_failures.store(times, Ordering::SeqCst);
        store
    }

    pub(crate) fn failing_complete(times: u32) -> Self {
        let store = Self::default();
        store.complete_failures.store(times, Ordering::SeqCst);
        store
    }

    pub(crate) fn failing_fail(times: u32) -> Self {
        let store = Self::default();
        store.fail_failures.store(times, Ordering::SeqCst);
        store
    }

    fn trip(counter: &AtomicU32) -> Result<(), JobStoreError> {
        let tripped = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if tripped {
            return Err(JobStoreError::Storage("connection reset".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl JobStore for FlakyStore {
    async fn insert(&self, job: NewJob) -> Result<JobRecord, JobStoreError> {
        self.inner.insert(job).await
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, JobStoreError> {
        self.inner.get(id).await
    }

    async fn claim(&self, id: JobId) -> Result<ClaimOutcome, JobStoreError> {
        Self::trip(&self.claim_failures)?;
        self.inner.claim(id).await
    }

    async fn complete(&self, id: JobId, result: JsonValue) -> Result<JobRecord, JobStoreError> {
        Self::trip(&self.complete_failures)?;
        self.inner.complete(id, result).await
    }

    async fn fail(&self, id: JobId, message: &str) -> Result<JobRecord, JobStoreError> {
        Self::trip(&self.fail_failures)?;
        self.inner.fail(id, message).await
    }

    async fn touch(&self, id: JobId) -> Result<bool, JobStoreError> {
        self.inner.touch(id).await
    }

    async fn list_stale(
        &self,
        status: JobStatus,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<JobRecord>, JobStoreError> {
        self.inner.list_stale(status, older_than, limit).await
    }

    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        self.inner.stats().await
    }
}
