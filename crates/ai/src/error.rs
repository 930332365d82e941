use thiserror::Error;

use bioforge_core::AlgorithmId;

/// Failure talking to the external AI service (or its collaborators).
#[derive(Debug, Error)]
pub enum AiError {
    #[error("AI transport error: {0}")]
    Transport(String),

    #[error("AI authentication failed: {0}")]
    Auth(String),

    #[error("AI rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("AI service returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("invalid AI response: {0}")]
    InvalidResponse(String),

    #[error("algorithm source error: {0}")]
    Source(String),
}

/// Failure inside a processor.
///
/// The worker pool writes `to_string()` of this error into the job record, so
/// the display text is what callers eventually see as `errorMessage`.
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("invalid job input: {0}")]
    InvalidInput(String),

    #[error("algorithm {0} not found")]
    AlgorithmNotFound(AlgorithmId),

    #[error(transparent)]
    Ai(#[from] AiError),

    #[error("AI response could not be used: {0}")]
    UnusableResponse(String),

    #[error("{0}")]
    Other(String),
}

impl ProcessorError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}
