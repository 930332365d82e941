//! `bioforge-core`: shared building blocks for the job subsystem.
//!
//! This crate contains **pure** primitives (no infrastructure concerns): typed
//! identifiers, the closed set of job types and the validation error model.

pub mod error;
pub mod id;
pub mod job_type;

pub use error::{DomainError, DomainResult};
pub use id::{AlgorithmId, JobId, UserId};
pub use job_type::JobType;
