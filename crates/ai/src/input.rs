//! Typed job payloads.
//!
//! Job records carry `input_data` as opaque JSON. Before anything runs, that
//! JSON is decoded into the payload type for the job's `JobType` and checked,
//! so a malformed request is rejected at enqueue time instead of failing later
//! inside a worker.

use std::collections::HashSet;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use bioforge_core::{AlgorithmId, JobType};

use crate::error::ProcessorError;

/// Seed for a brand-new algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateInput {
    /// Natural phenomenon or idea the algorithm should be modelled on.
    #[serde(alias = "seed")]
    pub inspiration: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
}

/// Algorithms to merge into a hybrid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesizeInput {
    pub algorithm_ids: Vec<AlgorithmId>,
    #[serde(default)]
    pub goal: Option<String>,
}

/// Analysis sub-types.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    /// Feasibility / sanity check, scored.
    #[serde(alias = "feasibility")]
    Sanity,
    /// Blind spots and risks, scored.
    #[serde(alias = "blindspots", alias = "blindSpots", alias = "risk")]
    BlindSpots,
    /// Extension ideation; the model answers with a list of ideas.
    #[serde(alias = "extension", alias = "ideation")]
    Extensions,
}

impl AnalysisType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisType::Sanity => "sanity",
            AnalysisType::BlindSpots => "blind_spots",
            AnalysisType::Extensions => "extensions",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeInput {
    pub algorithm_id: AlgorithmId,
    pub analysis_type: AnalysisType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImproveInput {
    pub algorithm_id: AlgorithmId,
    #[serde(alias = "changes", alias = "instructions")]
    pub change_description: String,
}

/// A decoded, validated job payload. One variant per `JobType`.
#[derive(Debug, Clone, PartialEq)]
pub enum JobInput {
    Generate(GenerateInput),
    Synthesize(SynthesizeInput),
    Analyze(AnalyzeInput),
    Improve(ImproveInput),
}

impl JobInput {
    /// Decode `input` as the payload for `job_type` and validate it.
    pub fn parse(job_type: JobType, input: &JsonValue) -> Result<Self, ProcessorError> {
        let parsed = match job_type {
            JobType::Generate => JobInput::Generate(decode(job_type, input)?),
            JobType::Synthesize => JobInput::Synthesize(decode(job_type, input)?),
            JobType::Analyze => JobInput::Analyze(decode(job_type, input)?),
            JobType::Improve => JobInput::Improve(decode(job_type, input)?),
        };
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn job_type(&self) -> JobType {
        match self {
            JobInput::Generate(_) => JobType::Generate,
            JobInput::Synthesize(_) => JobType::Synthesize,
            JobInput::Analyze(_) => JobType::Analyze,
            JobInput::Improve(_) => JobType::Improve,
        }
    }

    fn validate(&self) -> Result<(), ProcessorError> {
        match self {
            JobInput::Generate(i) => {
                if i.inspiration.trim().is_empty() {
                    return Err(ProcessorError::invalid_input("generate: inspiration must not be empty"));
                }
            }
            JobInput::Synthesize(i) => {
                let distinct: HashSet<_> = i.algorithm_ids.iter().collect();
                if distinct.len() < 2 {
                    return Err(ProcessorError::invalid_input(
                        "synthesize: at least two distinct algorithmIds are required",
                    ));
                }
                if distinct.len() != i.algorithm_ids.len() {
                    return Err(ProcessorError::invalid_input("synthesize: algorithmIds contains duplicates"));
                }
            }
            JobInput::Analyze(_) => {}
            JobInput::Improve(i) => {
                if i.change_description.trim().is_empty() {
                    return Err(ProcessorError::invalid_input(
                        "improve: changeDescription must not be empty",
                    ));
                }
            }
        }
        Ok(())
    }
}

fn decode<T: DeserializeOwned>(job_type: JobType, input: &JsonValue) -> Result<T, ProcessorError> {
    T::deserialize(input).map_err(|e| ProcessorError::invalid_input(format!("{job_type}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_analyze_input() {
        let input = JobInput::parse(
            JobType::Analyze,
            &json!({"algorithmId": 5, "analysisType": "sanity"}),
        )
        .unwrap();
        assert_eq!(
            input,
            JobInput::Analyze(AnalyzeInput {
                algorithm_id: AlgorithmId::new(5),
                analysis_type: AnalysisType::Sanity,
            })
        );
        assert_eq!(input.job_type(), JobType::Analyze);
    }

    #[test]
    fn accepts_analysis_aliases() {
        for (alias, expected) in [
            ("feasibility", AnalysisType::Sanity),
            ("blindSpots", AnalysisType::BlindSpots),
            ("risk", AnalysisType::BlindSpots),
            ("ideation", AnalysisType::Extensions),
        ] {
            let input = JobInput::parse(
                JobType::Analyze,
                &json!({"algorithmId": 1, "analysisType": alias}),
            )
            .unwrap();
            assert!(matches!(input, JobInput::Analyze(a) if a.analysis_type == expected));
        }
    }

    #[test]
    fn rejects_unknown_analysis_type() {
        let err = JobInput::parse(
            JobType::Analyze,
            &json!({"algorithmId": 1, "analysisType": "vibes"}),
        )
        .unwrap_err();
        assert!(matches!(err, ProcessorError::InvalidInput(_)));
    }

    #[test]
    fn generate_accepts_seed_alias_and_rejects_blank() {
        let input = JobInput::parse(JobType::Generate, &json!({"seed": "ant colonies"})).unwrap();
        assert!(matches!(input, JobInput::Generate(g) if g.inspiration == "ant colonies"));

        let err = JobInput::parse(JobType::Generate, &json!({"inspiration": "  "})).unwrap_err();
        assert!(matches!(err, ProcessorError::InvalidInput(_)));
    }

    #[test]
    fn synthesize_requires_two_distinct_ids() {
        assert!(JobInput::parse(JobType::Synthesize, &json!({"algorithmIds": [1]})).is_err());
        assert!(JobInput::parse(JobType::Synthesize, &json!({"algorithmIds": [1, 1]})).is_err());
        assert!(JobInput::parse(JobType::Synthesize, &json!({"algorithmIds": [1, 2]})).is_ok());
    }

    #[test]
    fn improve_requires_description() {
        assert!(JobInput::parse(JobType::Improve, &json!({"algorithmId": 3})).is_err());
        let ok = JobInput::parse(
            JobType::Improve,
            &json!({"algorithmId": 3, "instructions": "add elitism"}),
        )
        .unwrap();
        assert!(matches!(ok, JobInput::Improve(i) if i.change_description == "add elitism"));
    }
}
