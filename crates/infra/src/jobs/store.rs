//! Job storage implementations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use bioforge_core::JobId;

use super::types::{ClaimOutcome, JobRecord, JobStats, JobStatus, NewJob};

/// Job record store abstraction.
///
/// This is the only shared mutable resource in the subsystem. Ownership of a
/// job is taken with [`JobStore::claim`], which must be atomic.
#[async_trait::async_trait]
pub trait JobStore: Send + Sync + 'static {
    /// Insert a new pending job and assign its id.
    async fn insert(&self, job: NewJob) -> Result<JobRecord, JobStoreError>;

    /// Get a job by id.
    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, JobStoreError>;

    /// Atomically move a job from `pending` to `processing`.
    async fn claim(&self, id: JobId) -> Result<ClaimOutcome, JobStoreError>;

    /// Move a `processing` job to `completed`.
    async fn complete(&self, id: JobId, result: JsonValue) -> Result<JobRecord, JobStoreError>;

    /// Move a `processing` job to `failed`.
    async fn fail(&self, id: JobId, message: &str) -> Result<JobRecord, JobStoreError>;

    /// Refresh `updated_at` of a job that is still pending.
    ///
    /// Returns false when the job is no longer pending.
    async fn touch(&self, id: JobId) -> Result<bool, JobStoreError>;

    /// Jobs in `status` whose `updated_at` is older than `older_than`, oldest first.
    async fn list_stale(
        &self,
        status: JobStatus,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<JobRecord>, JobStoreError>;

    /// Job counts by status.
    async fn stats(&self) -> Result<JobStats, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job {id}: illegal transition {from} -> {to}")]
    IllegalTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
    #[error("storage error: {0}")]
    Storage(String),
}

/// In-memory job store for tests/dev.
#[derive(Debug)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, JobRecord>>,
    next_id: AtomicI64,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<JobId, JobRecord>>, JobStoreError> {
        self.jobs
            .read()
            .map_err(|_| JobStoreError::Storage("job store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<JobId, JobRecord>>, JobStoreError> {
        self.jobs
            .write()
            .map_err(|_| JobStoreError::Storage("job store lock poisoned".to_string()))
    }

    fn transition<F>(&self, id: JobId, to: JobStatus, apply: F) -> Result<JobRecord, JobStoreError>
    where
        F: FnOnce(&mut JobRecord),
    {
        let mut jobs = self.write()?;
        let job = jobs.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;
        if !job.status.can_transition_to(to) {
            return Err(JobStoreError::IllegalTransition {
                id,
                from: job.status,
                to,
            });
        }
        apply(job);
        Ok(job.clone())
    }

    /// Shift a job's timestamps into the past.
    #[cfg(test)]
    pub(crate) fn backdate(&self, id: JobId, by: std::time::Duration) {
        let by = chrono::Duration::from_std(by).unwrap_or_default();
        if let Ok(mut jobs) = self.write() {
            if let Some(job) = jobs.get_mut(&id) {
                job.created_at -= by;
                job.updated_at -= by;
            }
        }
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: NewJob) -> Result<JobRecord, JobStoreError> {
        let id = JobId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let record = JobRecord::pending(id, job, Utc::now());
        self.write()?.insert(id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, JobStoreError> {
        Ok(self.read()?.get(&id).cloned())
    }

    async fn claim(&self, id: JobId) -> Result<ClaimOutcome, JobStoreError> {
        let mut jobs = self.write()?;
        match jobs.get_mut(&id) {
            None => Ok(ClaimOutcome::NotFound),
            Some(job) if job.status == JobStatus::Pending => {
                job.mark_processing(Utc::now());
                Ok(ClaimOutcome::Claimed(job.clone()))
            }
            Some(job) => Ok(ClaimOutcome::AlreadyClaimed(job.status)),
        }
    }

    async fn complete(&self, id: JobId, result: JsonValue) -> Result<JobRecord, JobStoreError> {
        self.transition(id, JobStatus::Completed, |job| {
            job.mark_completed(result, Utc::now())
        })
    }

    async fn fail(&self, id: JobId, message: &str) -> Result<JobRecord, JobStoreError> {
        self.transition(id, JobStatus::Failed, |job| job.mark_failed(message, Utc::now()))
    }

    async fn touch(&self, id: JobId) -> Result<bool, JobStoreError> {
        let mut jobs = self.write()?;
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Pending => {
                job.updated_at = Utc::now();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(JobStoreError::NotFound(id)),
        }
    }

    async fn list_stale(
        &self,
        status: JobStatus,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<JobRecord>, JobStoreError> {
        let jobs = self.read()?;
        let mut result: Vec<_> = jobs
            .values()
            .filter(|j| j.status == status && j.updated_at < older_than)
            .cloned()
            .collect();

        result.sort_by_key(|j| (j.updated_at, j.id));
        result.truncate(limit);
        Ok(result)
    }

    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        let jobs = self.read()?;
        let mut stats = JobStats::default();
        for job in jobs.values() {
            stats.record(job.status, 1);
        }
        Ok(stats)
    }
}
