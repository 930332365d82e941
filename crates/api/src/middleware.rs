use std::time::Instant;

use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::info;

use bioforge_core::UserId;

use crate::app::errors::json_error;
use crate::context::UserContext;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Require an `X-User-Id` header and expose it as a [`UserContext`].
pub async fn user_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let user_id = match extract_user_id(req.headers()) {
        Ok(id) => id,
        Err(message) => return json_error(StatusCode::UNAUTHORIZED, "missing_user", message),
    };

    req.extensions_mut().insert(UserContext::new(user_id));
    next.run(req).await
}

/// One log line per request with method, path, status and latency.
pub async fn log_requests(req: axum::http::Request<axum::body::Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(req).await;

    info!(
        %method,
        %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request handled"
    );
    response
}

fn extract_user_id(headers: &HeaderMap) -> Result<UserId, &'static str> {
    let header = headers
        .get(USER_ID_HEADER)
        .ok_or("X-User-Id header is required")?;

    let header = header
        .to_str()
        .map_err(|_| "X-User-Id header must be ASCII")?;

    header
        .trim()
        .parse::<UserId>()
        .map_err(|_| "X-User-Id header must be a numeric user id")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn parses_numeric_user_id() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static(" 42 "));
        assert_eq!(extract_user_id(&headers), Ok(UserId::new(42)));
    }

    #[test]
    fn rejects_missing_or_garbled_user_id() {
        assert!(extract_user_id(&HeaderMap::new()).is_err());

        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("alice"));
        assert!(extract_user_id(&headers).is_err());
    }
}
