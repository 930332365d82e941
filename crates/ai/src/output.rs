//! Structured processor results.
//!
//! These are what ends up in a completed job's `result_data`.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use bioforge_core::AlgorithmId;

use crate::input::AnalysisType;

/// An algorithm description as produced by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedAlgorithm {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub inspiration: Option<String>,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub parameters: JsonValue,
    #[serde(default)]
    pub applications: Vec<String>,
    #[serde(default)]
    pub pseudocode: Option<String>,
}

impl GeneratedAlgorithm {
    /// A usable algorithm needs at least a name and a description.
    pub fn is_complete(&self) -> bool {
        !self.name.trim().is_empty() && !self.description.trim().is_empty()
    }
}

/// Result of a `synthesize` job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HybridAlgorithm {
    pub source_ids: Vec<AlgorithmId>,
    pub algorithm: GeneratedAlgorithm,
}

/// Result of an `improve` job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImprovedAlgorithm {
    pub algorithm_id: AlgorithmId,
    pub revised: GeneratedAlgorithm,
    pub change_summary: String,
}

/// One idea from an `extensions` analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionIdea {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub potential: Option<String>,
}

/// Result of an `analyze` job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub algorithm_id: AlgorithmId,
    pub analysis_type: AnalysisType,
    /// 0-100 for scored analyses (sanity, blind spots); absent for extensions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default)]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommendations: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ideas: Vec<ExtensionIdea>,
    /// Set when the model output was unusable and this report is the default.
    #[serde(default)]
    pub degraded: bool,
}
