//! `bioforge-ai`
//!
//! **Responsibility:** the AI boundary of the job subsystem.
//!
//! - `client`: the external text-generation capability (`AiClient`) and its HTTP adapter.
//! - `sanitize`: lenient JSON extraction from free-form model output.
//! - `input`: typed, validated job payloads (`JobInput`).
//! - `processor`: per-job-type dispatch (`JobProcessor`, `ProcessorDispatch`).
//!
//! Processors produce structured results. They never touch job records; the
//! worker that owns a job writes its terminal state.

pub mod client;
pub mod error;
pub mod http_client;
pub mod input;
pub mod output;
pub mod processor;
pub mod sanitize;
pub mod source;

mod processors;
mod prompts;

pub use client::{AiClient, AiRequest, ScriptedAiClient};
pub use error::{AiError, ProcessorError};
pub use http_client::{HttpAiClient, HttpAiConfig};
pub use input::{AnalysisType, AnalyzeInput, GenerateInput, ImproveInput, JobInput, SynthesizeInput};
pub use output::{AnalysisReport, ExtensionIdea, GeneratedAlgorithm, HybridAlgorithm, ImprovedAlgorithm};
pub use processor::{JobProcessor, ProcessorDispatch};
pub use sanitize::{FallbackMonitor, SanitizeFailure, Sanitized, sanitize};
pub use source::{AlgorithmSource, AlgorithmSummary, InMemoryAlgorithmSource};
