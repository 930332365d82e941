use std::sync::Arc;

use axum::{extract::Extension, response::IntoResponse, Json};

use bioforge_infra::JobSystem;

pub async fn health(Extension(jobs): Extension<Arc<JobSystem>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "broker": jobs.broker_kind(),
        "workers": jobs.has_workers(),
    }))
}
