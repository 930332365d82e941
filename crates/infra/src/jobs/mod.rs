//! Asynchronous AI job lifecycle.
//!
//! ## Design
//!
//! - A job record is inserted as `pending` before anything is published
//! - Workers claim records with a compare-and-set, so duplicate deliveries are harmless
//! - Only the claiming worker writes the terminal state
//! - Callers observe progress by polling the record, never the broker
//!
//! ## Components
//!
//! - `JobStore`: durable job records (in-memory or Postgres)
//! - `Producer`: validates, records and publishes new jobs
//! - `WorkerPool`: bounded consumers that run processors
//! - `StatusPoller`: bounded, cancellable wait for a terminal state
//! - `RecoverySweep`: expires abandoned work and republishes stranded jobs

pub mod poller;
pub mod postgres;
pub mod producer;
pub mod recovery;
pub mod runner;
pub mod store;
pub mod types;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use poller::{PollError, PollOutcome, StatusPoller};
pub use postgres::PostgresJobStore;
pub use producer::{DeliveryState, EnqueueReceipt, Producer, ProducerError};
pub use recovery::{RecoverySweep, SweepReport};
pub use runner::{JobRunner, RunError, RunOutcome};
pub use store::{InMemoryJobStore, JobStore, JobStoreError};
pub use types::{ClaimOutcome, JobRecord, JobStats, JobStatus, NewJob};
pub use worker::{WorkerConfig, WorkerHandle, WorkerPool, WorkerStats};
