use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use bioforge_infra::jobs::{JobStats, WorkerStats};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub job_type: String,
    #[serde(default)]
    pub input_data: JsonValue,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitQuery {
    /// Capped at the poller's configured maximum.
    pub timeout_secs: Option<u64>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub jobs: JobStats,
    pub total: u64,
    pub broker: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<WorkerStats>,
}
