//! Recovery sweep for work that went missing between components.
//!
//! - `processing` jobs older than `processing_timeout` lost their worker; they
//!   are failed (status never moves backwards).
//! - `pending` jobs older than `republish_after` were never delivered (or the
//!   message was lost); they are published again. A duplicate message is
//!   absorbed by the store's claim.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::producer::Producer;
use super::store::{JobStore, JobStoreError};
use super::types::JobStatus;

const SWEEP_BATCH: usize = 100;

/// What one sweep changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub republished: usize,
}

pub struct RecoverySweep {
    store: Arc<dyn JobStore>,
    producer: Arc<Producer>,
    processing_timeout: Duration,
    republish_after: Duration,
    interval: Duration,
}

impl RecoverySweep {
    pub fn new(
        store: Arc<dyn JobStore>,
        producer: Arc<Producer>,
        processing_timeout: Duration,
        republish_after: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            producer,
            processing_timeout,
            republish_after,
            interval,
        }
    }

    /// Run one sweep as of `now`.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepReport, JobStoreError> {
        let mut report = SweepReport::default();

        let cutoff = now - chrono::Duration::from_std(self.processing_timeout).unwrap_or_default();
        let message = format!(
            "processing lease expired after {}s without a result",
            self.processing_timeout.as_secs()
        );
        for job in self.store.list_stale(JobStatus::Processing, cutoff, SWEEP_BATCH).await? {
            match self.store.fail(job.id, &message).await {
                Ok(_) => {
                    warn!(job_id = %job.id, "expired abandoned job");
                    report.expired += 1;
                }
                // Finished between the listing and the write.
                Err(JobStoreError::IllegalTransition { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        if !self.producer.is_queued() {
            return Ok(report);
        }

        let cutoff = now - chrono::Duration::from_std(self.republish_after).unwrap_or_default();
        for job in self.store.list_stale(JobStatus::Pending, cutoff, SWEEP_BATCH).await? {
            match self.producer.republish(&job).await {
                Ok(_) => {
                    self.store.touch(job.id).await?;
                    debug!(job_id = %job.id, "republished stranded job");
                    report.republished += 1;
                }
                Err(e) => {
                    warn!(error = %e, "republish failed; retrying on the next sweep");
                    break;
                }
            }
        }

        Ok(report)
    }

    /// Sweep every `interval` until `shutdown` is cancelled.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = self.interval.as_secs(), "recovery sweep started");
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match self.sweep_once(Utc::now()).await {
                    Ok(report) if report != SweepReport::default() => {
                        info!(expired = report.expired, republished = report.republished, "recovery sweep");
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "recovery sweep failed"),
                }
            }
            info!("recovery sweep stopped");
        })
    }
}
