use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use bioforge_core::JobId;
use bioforge_infra::JobSystem;

use crate::app::{dto, errors};
use crate::context::UserContext;
use crate::middleware;

pub fn router() -> Router {
    Router::new()
        .route(
            "/",
            post(create_job).route_layer(axum::middleware::from_fn(middleware::user_middleware)),
        )
        .route("/stats", get(job_stats))
        .route("/:id", get(get_job))
        .route("/:id/wait", get(wait_for_job))
}

pub async fn create_job(
    Extension(jobs): Extension<Arc<JobSystem>>,
    Extension(user): Extension<UserContext>,
    Json(body): Json<dto::CreateJobRequest>,
) -> axum::response::Response {
    let receipt = match jobs
        .producer()
        .enqueue(&body.job_type, body.input_data, user.user_id())
        .await
    {
        Ok(r) => r,
        Err(e) => return errors::producer_error_to_response(e),
    };

    (StatusCode::ACCEPTED, Json(receipt)).into_response()
}

pub async fn get_job(
    Extension(jobs): Extension<Arc<JobSystem>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_job_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match jobs.store().get(id).await {
        Ok(Some(job)) => (StatusCode::OK, Json(job)).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", format!("job {id} not found")),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// Block until the job is terminal, then return the record.
pub async fn wait_for_job(
    Extension(jobs): Extension<Arc<JobSystem>>,
    Path(id): Path<String>,
    Query(query): Query<dto::WaitQuery>,
) -> axum::response::Response {
    let id = match parse_job_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let cap = jobs.poller().max_wait();
    let max_wait = query
        .timeout_secs
        .map(|secs| Duration::from_secs(secs).min(cap))
        .unwrap_or(cap);

    let poller = jobs.poller().with_max_wait(max_wait);
    if let Err(e) = poller.wait_for(id, &jobs.shutdown_token()).await {
        return errors::poll_error_to_response(e);
    }

    match jobs.store().get(id).await {
        Ok(Some(job)) => (StatusCode::OK, Json(job)).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", format!("job {id} not found")),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn job_stats(Extension(jobs): Extension<Arc<JobSystem>>) -> axum::response::Response {
    let stats = match jobs.job_stats().await {
        Ok(s) => s,
        Err(e) => return errors::store_error_to_response(e),
    };

    Json(dto::StatsResponse {
        total: stats.total(),
        jobs: stats,
        broker: jobs.broker_kind(),
        workers: jobs.worker_stats(),
    })
    .into_response()
}

fn parse_job_id(raw: &str) -> Result<JobId, axum::response::Response> {
    raw.parse()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid job id"))
}
