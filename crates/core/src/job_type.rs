//! The closed set of job types.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Kind of asynchronous AI work a job performs.
///
/// Adding a variant forces every dispatch site to handle it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Produce a new algorithm description from a seed.
    Generate,
    /// Combine several existing algorithms into a hybrid.
    Synthesize,
    /// Run an analysis sub-type against an existing algorithm.
    Analyze,
    /// Apply a described change to an existing algorithm.
    Improve,
}

impl JobType {
    pub const ALL: [JobType; 4] = [
        JobType::Generate,
        JobType::Synthesize,
        JobType::Analyze,
        JobType::Improve,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Generate => "generate",
            JobType::Synthesize => "synthesize",
            JobType::Analyze => "analyze",
            JobType::Improve => "improve",
        }
    }
}

impl core::fmt::Display for JobType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                DomainError::validation(format!(
                    "unknown job type '{s}' (expected one of: generate, synthesize, analyze, improve)"
                ))
            })
    }
}
