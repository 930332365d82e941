//! Infrastructure layer: job records, queue broker, workers and runtime wiring.
//!
//! - `jobs`: the job lifecycle (store, producer, worker pool, poller, recovery).
//! - `broker`: at-least-once message delivery (in-memory, Redis Streams).
//! - `config`: environment-driven settings.
//! - `runtime`: assembles everything into a [`runtime::JobSystem`].

pub mod algorithms;
pub mod broker;
pub mod config;
pub mod jobs;
pub mod runtime;


pub use config::{ConfigError, JobsConfig};
pub use runtime::{JobSystem, RuntimeError};
