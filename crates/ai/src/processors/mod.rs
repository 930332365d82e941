//! Per-job-type processors.

use serde::de::DeserializeOwned;

use bioforge_core::AlgorithmId;

use crate::client::AiClient;
use crate::error::ProcessorError;
use crate::sanitize::{FallbackMonitor, Sanitized, sanitize};
use crate::source::{AlgorithmSource, AlgorithmSummary};

pub(crate) mod analyze;
pub(crate) mod generate;
pub(crate) mod improve;
pub(crate) mod synthesize;

/// Borrowed collaborators shared by every processor invocation.
pub(crate) struct ProcessorContext<'a> {
    pub client: &'a dyn AiClient,
    pub algorithms: &'a dyn AlgorithmSource,
    pub fallbacks: &'a FallbackMonitor,
}

impl ProcessorContext<'_> {
    pub async fn load(&self, id: AlgorithmId) -> Result<AlgorithmSummary, ProcessorError> {
        self.algorithms
            .fetch(id)
            .await?
            .ok_or(ProcessorError::AlgorithmNotFound(id))
    }

    /// Sanitize `raw` into `T`, treating a fallback as an unusable response.
    pub fn require<T: DeserializeOwned>(&self, source: &'static str, raw: &str) -> Result<T, ProcessorError> {
        let outcome = sanitize::<Option<T>>(raw, None);
        self.fallbacks.observe(source, &outcome);
        match outcome {
            Sanitized::Parsed(Some(value)) => Ok(value),
            Sanitized::Parsed(None) => Err(ProcessorError::UnusableResponse(format!(
                "{source}: model returned null"
            ))),
            Sanitized::Fallback { reason, .. } => Err(ProcessorError::UnusableResponse(format!(
                "{source}: {reason} JSON in model output"
            ))),
        }
    }
}
