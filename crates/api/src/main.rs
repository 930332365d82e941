use std::sync::Arc;

use anyhow::Context;

use bioforge_infra::{JobSystem, JobsConfig};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bioforge_observability::init();

    let config = JobsConfig::from_env().context("invalid job configuration")?;
    let jobs = Arc::new(
        JobSystem::connect(&config)
            .await
            .context("failed to start the job system")?,
    );

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tracing::info!(
        addr = %listener.local_addr()?,
        broker = ?jobs.broker_kind(),
        workers = jobs.has_workers(),
        "listening"
    );

    let app = bioforge_api::app::build_app(jobs.clone());
    let token = jobs.shutdown_token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutdown requested");
            // Releases long-polling waiters so in-flight requests can drain.
            token.cancel();
        })
        .await
        .context("server error")?;

    jobs.shutdown().await;
    Ok(())
}
