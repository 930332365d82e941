//! Processor dispatch: one closed match from job type to processor.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, instrument};

use bioforge_core::{JobType, UserId};

use crate::client::AiClient;
use crate::error::ProcessorError;
use crate::input::JobInput;
use crate::processors::{self, ProcessorContext};
use crate::sanitize::FallbackMonitor;
use crate::source::AlgorithmSource;

/// Runs the business logic for one job.
///
/// The worker pool depends on this trait rather than on [`ProcessorDispatch`]
/// so that tests (and alternative backends) can plug in their own behaviour.
#[async_trait::async_trait]
pub trait JobProcessor: Send + Sync + 'static {
    /// Produce the result for a job, or fail.
    ///
    /// Must not write job records; the caller owns the job's state.
    async fn process(
        &self,
        job_type: JobType,
        input: &JsonValue,
        user_id: UserId,
    ) -> Result<JsonValue, ProcessorError>;
}

/// The production [`JobProcessor`]: AI client + algorithm lookup + sanitizer.
pub struct ProcessorDispatch {
    client: Arc<dyn AiClient>,
    algorithms: Arc<dyn AlgorithmSource>,
    fallbacks: FallbackMonitor,
}

impl ProcessorDispatch {
    pub fn new(client: Arc<dyn AiClient>, algorithms: Arc<dyn AlgorithmSource>) -> Self {
        Self {
            client,
            algorithms,
            fallbacks: FallbackMonitor::default(),
        }
    }

    /// Escalate after `n` consecutive unparseable responses (default 3).
    pub fn with_escalation_threshold(mut self, n: u32) -> Self {
        self.fallbacks = FallbackMonitor::new(n);
        self
    }

    pub fn fallbacks(&self) -> &FallbackMonitor {
        &self.fallbacks
    }
}

impl core::fmt::Debug for ProcessorDispatch {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProcessorDispatch")
            .field("fallbacks", &self.fallbacks)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl JobProcessor for ProcessorDispatch {
    #[instrument(skip(self, input), fields(job_type = %job_type, user_id = %user_id), err)]
    async fn process(
        &self,
        job_type: JobType,
        input: &JsonValue,
        user_id: UserId,
    ) -> Result<JsonValue, ProcessorError> {
        let input = JobInput::parse(job_type, input)?;
        let ctx = ProcessorContext {
            client: self.client.as_ref(),
            algorithms: self.algorithms.as_ref(),
            fallbacks: &self.fallbacks,
        };

        let result = match input {
            JobInput::Generate(i) => encode(&processors::generate::run(&ctx, i).await?)?,
            JobInput::Synthesize(i) => encode(&processors::synthesize::run(&ctx, i).await?)?,
            JobInput::Analyze(i) => encode(&processors::analyze::run(&ctx, i).await?)?,
            JobInput::Improve(i) => encode(&processors::improve::run(&ctx, i).await?)?,
        };

        debug!("processor finished");
        Ok(result)
    }
}

fn encode<T: Serialize>(value: &T) -> Result<JsonValue, ProcessorError> {
    serde_json::to_value(value).map_err(|e| ProcessorError::other(format!("failed to encode result: {e}")))
}
