//! Bounded worker pool consuming job messages from a broker.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, Delivery, ReconnectPolicy};

use super::runner::{JobRunner, RunError, RunOutcome};
use super::store::JobStoreError;

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum jobs processed at the same time
    pub concurrency: usize,
    /// Consumer name reported to the broker
    pub consumer_name: String,
    /// How long one `receive` call may block
    pub receive_block: Duration,
    /// Backoff applied to consecutive receive failures
    pub reconnect: ReconnectPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            consumer_name: format!("worker-{}", uuid::Uuid::now_v7()),
            receive_block: Duration::from_secs(1),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl WorkerConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_consumer_name(mut self, name: impl Into<String>) -> Self {
        self.consumer_name = name.into();
        self
    }

    pub fn with_receive_block(mut self, block: Duration) -> Self {
        self.receive_block = block;
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }
}

/// Worker pool runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct WorkerStats {
    pub received: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub store_errors: u64,
    pub broker_errors: u64,
    pub in_flight: usize,
    pub uptime_secs: u64,
}

type SharedStats = Arc<Mutex<WorkerStats>>;

fn update_stats(stats: &SharedStats, f: impl FnOnce(&mut WorkerStats)) {
    let mut guard = stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    f(&mut guard);
}

/// Handle to control a running worker pool.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: CancellationToken,
    join: Option<JoinHandle<()>>,
    stats: SharedStats,
    started: Instant,
}

impl WorkerHandle {
    /// Stop receiving and wait for in-flight jobs to finish.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                error!(error = %e, "worker pool task ended abnormally");
            }
        }
    }

    /// Get current pool statistics.
    pub fn stats(&self) -> WorkerStats {
        let mut stats = self
            .stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        stats.uptime_secs = self.started.elapsed().as_secs();
        stats
    }
}

/// Consumes deliveries and runs each job with at most `concurrency` in flight.
pub struct WorkerPool {
    broker: Arc<dyn Broker>,
    runner: JobRunner,
    config: WorkerConfig,
}

impl WorkerPool {
    pub fn new(broker: Arc<dyn Broker>, runner: JobRunner, config: WorkerConfig) -> Self {
        Self {
            broker,
            runner,
            config,
        }
    }

    /// Spawn the pool onto the current tokio runtime.
    ///
    /// Cancelling `shutdown` (or calling [`WorkerHandle::shutdown`]) stops it.
    pub fn spawn(self, shutdown: CancellationToken) -> WorkerHandle {
        let stats: SharedStats = Arc::new(Mutex::new(WorkerStats::default()));
        let join = tokio::spawn(self.run(shutdown.clone(), stats.clone()));

        WorkerHandle {
            shutdown,
            join: Some(join),
            stats,
            started: Instant::now(),
        }
    }

    async fn run(self, shutdown: CancellationToken, stats: SharedStats) {
        let concurrency = self.config.concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut failures: u32 = 0;

        info!(
            consumer = %self.config.consumer_name,
            broker = self.broker.kind(),
            concurrency,
            "worker pool started"
        );

        loop {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self.broker.receive(&self.config.consumer_name, self.config.receive_block) => received,
            };

            match received {
                Ok(Some(delivery)) => {
                    failures = 0;
                    update_stats(&stats, |s| {
                        s.received += 1;
                        s.in_flight += 1;
                    });
                    tokio::spawn(handle_delivery(
                        self.broker.clone(),
                        self.runner.clone(),
                        delivery,
                        stats.clone(),
                        self.config.reconnect.base_delay,
                        permit,
                    ));
                }
                Ok(None) => drop(permit),
                Err(e) => {
                    drop(permit);
                    failures = failures.saturating_add(1);
                    update_stats(&stats, |s| s.broker_errors += 1);
                    let delay = self.config.reconnect.delay_for_attempt(failures);
                    warn!(
                        error = %e,
                        consecutive_failures = failures,
                        retry_in_ms = delay.as_millis() as u64,
                        "broker receive failed"
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        // Every handler holds a permit; owning all of them means none are left running.
        let _ = semaphore.acquire_many(concurrency as u32).await;
        info!(consumer = %self.config.consumer_name, "worker pool stopped");
    }
}

async fn handle_delivery(
    broker: Arc<dyn Broker>,
    runner: JobRunner,
    delivery: Delivery,
    stats: SharedStats,
    release_delay: Duration,
    _permit: OwnedSemaphorePermit,
) {
    let result = runner.run(&delivery.message).await;

    let settled = match &result {
        Ok(RunOutcome::Completed(_)) => {
            update_stats(&stats, |s| s.completed += 1);
            broker.ack(&delivery).await
        }
        Ok(RunOutcome::Skipped(status)) => {
            debug!(delivery_id = %delivery.id, ?status, "duplicate delivery acknowledged");
            update_stats(&stats, |s| s.skipped += 1);
            broker.ack(&delivery).await
        }
        Err(RunError::Processor(e)) => {
            update_stats(&stats, |s| s.failed += 1);
            broker.reject(&delivery, &e.to_string()).await
        }
        Err(RunError::Store(e @ JobStoreError::IllegalTransition { .. })) => {
            // Already terminal (the lease sweep got there first); redelivery cannot help.
            warn!(
                delivery_id = %delivery.id,
                job_id = %delivery.message.job_id,
                error = %e,
                "job outcome already recorded; dropping late result"
            );
            update_stats(&stats, |s| s.skipped += 1);
            broker.ack(&delivery).await
        }
        Err(RunError::Store(e)) => {
            error!(
                delivery_id = %delivery.id,
                job_id = %delivery.message.job_id,
                error = %e,
                "job store unavailable; leaving delivery for redelivery"
            );
            update_stats(&stats, |s| s.store_errors += 1);
            tokio::time::sleep(release_delay).await;
            broker.release(&delivery).await
        }
    };

    if let Err(e) = settled {
        warn!(delivery_id = %delivery.id, error = %e, "failed to settle delivery");
        update_stats(&stats, |s| s.broker_errors += 1);
    }
    update_stats(&stats, |s| s.in_flight = s.in_flight.saturating_sub(1));
}
