//! Assembles the job subsystem from configuration.
//!
//! One [`JobSystem`] is built at startup and shared (behind an `Arc`) with
//! whatever needs to enqueue or observe jobs.

use std::sync::{Arc, Mutex};

use sqlx::postgres::PgPoolOptions;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use bioforge_ai::{AiError, AlgorithmSource, HttpAiClient, InMemoryAlgorithmSource, JobProcessor, ProcessorDispatch};

use crate::algorithms::PostgresAlgorithmSource;
use crate::broker::{Broker, BrokerError, InMemoryBroker, ReconnectPolicy};
use crate::config::JobsConfig;
use crate::jobs::{
    InMemoryJobStore, JobRunner, JobStats, JobStore, JobStoreError, PostgresJobStore, Producer,
    RecoverySweep, StatusPoller, WorkerConfig, WorkerHandle, WorkerPool, WorkerStats,
};

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("database connection failed: {0}")]
    Database(String),

    #[error(transparent)]
    Store(#[from] JobStoreError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("REDIS_URL is set but this build was compiled without the `redis` feature")]
    RedisUnsupported,

    #[error(transparent)]
    Ai(#[from] AiError),
}

/// The running job subsystem: producer, poller, store and background tasks.
pub struct JobSystem {
    store: Arc<dyn JobStore>,
    producer: Arc<Producer>,
    poller: StatusPoller,
    broker_kind: Option<&'static str>,
    workers: Mutex<Option<WorkerHandle>>,
    recovery: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for JobSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSystem")
            .field("broker", &self.broker_kind)
            .field("poller", &self.poller)
            .finish_non_exhaustive()
    }
}

impl JobSystem {
    /// Connect every collaborator named by `config` and start the system.
    pub async fn connect(config: &JobsConfig) -> Result<Self, RuntimeError> {
        let (store, algorithms): (Arc<dyn JobStore>, Arc<dyn AlgorithmSource>) =
            match &config.database_url {
                Some(url) => {
                    let pool = PgPoolOptions::new()
                        .max_connections(10)
                        .connect(url)
                        .await
                        .map_err(|e| RuntimeError::Database(e.to_string()))?;
                    let store = PostgresJobStore::new(pool.clone());
                    store.ensure_schema().await?;
                    info!("using Postgres job store");
                    let store: Arc<dyn JobStore> = Arc::new(store);
                    let algorithms: Arc<dyn AlgorithmSource> = Arc::new(PostgresAlgorithmSource::new(pool));
                    (store, algorithms)
                }
                None => {
                    warn!("DATABASE_URL not set; using in-memory job store (jobs are lost on restart)");
                    let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
                    let algorithms: Arc<dyn AlgorithmSource> = Arc::new(InMemoryAlgorithmSource::new());
                    (store, algorithms)
                }
            };

        let broker = if config.broker_enabled {
            Some(connect_broker(config)?)
        } else {
            None
        };

        let client = Arc::new(HttpAiClient::new(config.ai.clone())?);
        let processor = Arc::new(ProcessorDispatch::new(client, algorithms));

        Ok(Self::start(config, store, broker, processor))
    }

    /// Start the system from already-built parts.
    ///
    /// With a broker, a worker pool consumes it; without one, jobs run inline
    /// on the enqueue path and no workers are started. Must be called from
    /// within a tokio runtime.
    pub fn start(
        config: &JobsConfig,
        store: Arc<dyn JobStore>,
        broker: Option<Arc<dyn Broker>>,
        processor: Arc<dyn JobProcessor>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let runner = JobRunner::new(store.clone(), processor);
        let broker_kind = broker.as_ref().map(|b| b.kind());

        let (producer, workers) = match broker {
            Some(broker) => {
                let producer = Producer::queued(
                    store.clone(),
                    broker.clone(),
                    ReconnectPolicy::bounded(
                        3,
                        std::time::Duration::from_millis(100),
                        std::time::Duration::from_secs(1),
                    ),
                );
                let worker_config = WorkerConfig::default().with_concurrency(config.worker_concurrency);
                let handle = WorkerPool::new(broker, runner, worker_config).spawn(shutdown.child_token());
                (producer, Some(handle))
            }
            None => {
                info!("broker disabled; jobs run inline and no worker pool is started");
                (Producer::inline(store.clone(), runner), None)
            }
        };
        let producer = Arc::new(producer);

        let recovery = RecoverySweep::new(
            store.clone(),
            producer.clone(),
            config.processing_timeout,
            config.republish_after,
            config.recovery_interval,
        )
        .spawn(shutdown.child_token());

        Self {
            poller: StatusPoller::new(store.clone(), config.poll_interval, config.poll_max_wait),
            store,
            producer,
            broker_kind,
            workers: Mutex::new(workers),
            recovery: Mutex::new(Some(recovery)),
            shutdown,
        }
    }

    pub fn producer(&self) -> &Producer {
        &self.producer
    }

    pub fn poller(&self) -> &StatusPoller {
        &self.poller
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Broker implementation in use, `None` when running inline.
    pub fn broker_kind(&self) -> Option<&'static str> {
        self.broker_kind
    }

    pub fn has_workers(&self) -> bool {
        self.workers.lock().map(|w| w.is_some()).unwrap_or(false)
    }

    pub fn worker_stats(&self) -> Option<WorkerStats> {
        self.workers
            .lock()
            .ok()
            .and_then(|w| w.as_ref().map(WorkerHandle::stats))
    }

    pub async fn job_stats(&self) -> Result<JobStats, JobStoreError> {
        self.store.stats().await
    }

    /// Token cancelled when the system shuts down; waiters can hang off it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop background tasks and wait for in-flight jobs.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let workers = self.workers.lock().ok().and_then(|mut w| w.take());
        if let Some(workers) = workers {
            workers.shutdown().await;
        }

        let recovery = self.recovery.lock().ok().and_then(|mut r| r.take());
        if let Some(recovery) = recovery {
            if let Err(e) = recovery.await {
                error!(error = %e, "recovery task ended abnormally");
            }
        }
        info!("job system stopped");
    }
}

fn connect_broker(config: &JobsConfig) -> Result<Arc<dyn Broker>, RuntimeError> {
    match &config.redis_url {
        #[cfg(feature = "redis")]
        Some(url) => {
            let broker = crate::broker::RedisStreamsBroker::new(url, Some(config.queue_name.clone()))?;
            info!(stream = %config.queue_name, "using Redis Streams broker");
            Ok(Arc::new(broker))
        }
        #[cfg(not(feature = "redis"))]
        Some(_) => Err(RuntimeError::RedisUnsupported),
        None => {
            warn!("REDIS_URL not set; using in-process broker");
            Ok(Arc::new(InMemoryBroker::new()))
        }
    }
}
