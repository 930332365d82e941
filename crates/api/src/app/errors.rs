use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use bioforge_infra::jobs::{JobStoreError, PollError, ProducerError};

pub fn producer_error_to_response(err: ProducerError) -> axum::response::Response {
    match err {
        ProducerError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        ProducerError::Store(e) => store_error_to_response(e),
    }
}

pub fn store_error_to_response(err: JobStoreError) -> axum::response::Response {
    match err {
        JobStoreError::NotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("job {id} not found"))
        }
        JobStoreError::IllegalTransition { .. } => {
            json_error(StatusCode::CONFLICT, "conflict", err.to_string())
        }
        JobStoreError::Storage(msg) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg),
    }
}

pub fn poll_error_to_response(err: PollError) -> axum::response::Response {
    match err {
        PollError::NotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("job {id} not found"))
        }
        PollError::TimedOut { .. } => json_error(StatusCode::REQUEST_TIMEOUT, "timeout", err.to_string()),
        PollError::Cancelled(_) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "shutting_down", err.to_string())
        }
        PollError::Lookup(e) => store_error_to_response(e),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bioforge_core::JobId;

    use super::*;

    #[test]
    fn maps_errors_to_statuses() {
        let cases = [
            (
                producer_error_to_response(ProducerError::Validation("bad".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                store_error_to_response(JobStoreError::NotFound(JobId::new(1))),
                StatusCode::NOT_FOUND,
            ),
            (
                store_error_to_response(JobStoreError::Storage("down".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                poll_error_to_response(PollError::TimedOut {
                    job_id: JobId::new(1),
                    waited: Duration::from_secs(3),
                }),
                StatusCode::REQUEST_TIMEOUT,
            ),
            (
                poll_error_to_response(PollError::Cancelled(JobId::new(1))),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (response, status) in cases {
            assert_eq!(response.status(), status);
        }
    }
}
