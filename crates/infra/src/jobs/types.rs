//! Core job types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use bioforge_core::{DomainError, JobId, JobType, UserId};

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Recorded, waiting for a worker
    Pending,
    /// Claimed by exactly one worker
    Processing,
    /// Finished with a result
    Completed,
    /// Finished with an error message
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Transitions only move forward: `pending -> processing -> completed | failed`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown job status '{s}'")))
    }
}

/// A persisted job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: JobStatus,
    pub user_id: UserId,
    pub input_data: JsonValue,
    /// Present iff `status == Completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_data: Option<JsonValue>,
    /// Present iff `status == Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// A fresh pending record.
    pub fn pending(id: JobId, job: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            id,
            job_type: job.job_type,
            status: JobStatus::Pending,
            user_id: job.user_id,
            input_data: job.input_data,
            result_data: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `Processing`.
    pub fn mark_processing(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Processing;
        self.updated_at = now;
    }

    /// Move to `Completed` with a result.
    pub fn mark_completed(&mut self, result: JsonValue, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.result_data = Some(result);
        self.error_message = None;
        self.updated_at = now;
        self.completed_at = Some(now);
    }

    /// Move to `Failed` with an error message.
    pub fn mark_failed(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.status = JobStatus::Failed;
        self.result_data = None;
        self.error_message = Some(message.into());
        self.updated_at = now;
        self.completed_at = Some(now);
    }
}

/// Insert request for a new job.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub job_type: JobType,
    pub user_id: UserId,
    pub input_data: JsonValue,
}

impl NewJob {
    pub fn new(job_type: JobType, user_id: UserId, input_data: JsonValue) -> Self {
        Self {
            job_type,
            user_id,
            input_data,
        }
    }
}

/// Result of an attempt to take ownership of a job.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The caller now owns the job; the record is already `Processing`.
    Claimed(JobRecord),
    /// Someone else got there first (or the job is already terminal).
    AlreadyClaimed(JobStatus),
    NotFound,
}

/// Job counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl JobStats {
    pub fn record(&mut self, status: JobStatus, count: u64) {
        match status {
            JobStatus::Pending => self.pending += count,
            JobStatus::Processing => self.processing += count,
            JobStatus::Completed => self.completed += count,
            JobStatus::Failed => self.failed += count,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> JobRecord {
        JobRecord::pending(
            JobId::new(1),
            NewJob::new(JobType::Generate, UserId::new(9), json!({"inspiration": "ants"})),
            Utc::now(),
        )
    }

    #[test]
    fn transitions_only_move_forward() {
        use JobStatus::*;

        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Processing.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Processing));
        for status in JobStatus::ALL {
            assert!(!status.can_transition_to(status));
        }
    }

    #[test]
    fn job_lifecycle() {
        let mut job = record();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.completed_at.is_none());

        job.mark_processing(Utc::now());
        assert_eq!(job.status, JobStatus::Processing);
        assert!(!job.is_terminal());

        job.mark_completed(json!({"name": "Ant Walk"}), Utc::now());
        assert!(job.is_terminal());
        assert!(job.result_data.is_some());
        assert!(job.error_message.is_none());
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn failure_clears_result() {
        let mut job = record();
        job.mark_processing(Utc::now());
        job.mark_failed("AI transport error: timeout", Utc::now());

        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.result_data.is_none());
        assert_eq!(job.error_message.as_deref(), Some("AI transport error: timeout"));
    }

    #[test]
    fn serializes_with_external_field_names() {
        let value = serde_json::to_value(record()).unwrap();
        assert_eq!(value["type"], "generate");
        assert_eq!(value["status"], "pending");
        assert_eq!(value["userId"], 9);
        assert!(value.get("resultData").is_none());
        assert!(value.get("completedAt").is_none());
    }

    #[test]
    fn status_parses_from_storage_text() {
        assert_eq!("processing".parse::<JobStatus>().unwrap(), JobStatus::Processing);
        assert!("running".parse::<JobStatus>().is_err());
    }
}
