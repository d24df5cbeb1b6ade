//! Optional API key authentication
//!
//! When [`ApiConfig::api_key`](crate::config::ApiConfig::api_key) is set,
//! every request must carry it in the `X-Api-Key` header.

use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Header carrying the key
pub const API_KEY_HEADER: &str = "x-api-key";

/// Middleware rejecting requests without the configured key
///
/// ```no_run
/// use axum::{Router, middleware};
/// use command_scheduler::api::auth::require_api_key;
///
/// let router: Router = Router::new().layer(middleware::from_fn_with_state(
///     Some("secret-key-123".to_string()),
///     require_api_key,
/// ));
/// ```
pub async fn require_api_key(
    State(expected): State<Option<String>>,
    request: Request,
    next: Next,
) -> Response {
    match check_api_key(request.headers(), expected.as_deref()) {
        Ok(()) => next.run(request).await,
        Err(reason) => {
            tracing::debug!(uri = %request.uri(), reason, "Rejected unauthenticated request");
            unauthorized_response(reason)
        }
    }
}

/// Compare the request's key against `expected`; `None` lets everything through
fn check_api_key(headers: &HeaderMap, expected: Option<&str>) -> Result<(), &'static str> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let provided = headers
        .get(API_KEY_HEADER)
        .ok_or("Missing X-Api-Key header")?
        .to_str()
        .map_err(|_| "Invalid API key")?;

    if constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        Err("Invalid API key")
    }
}

/// Byte comparison that does not stop at the first mismatch
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn unauthorized_response(message: &str) -> Response {
    let body = Json(json!({
        "error": {
            "code": "unauthorized",
            "message": message
        }
    }));
    (StatusCode::UNAUTHORIZED, body).into_response()
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, body::Body, http::Request, middleware, routing::get};
    use tower::ServiceExt;

    fn guarded(key: Option<&str>) -> Router {
        Router::new()
            .route("/stats", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(
                key.map(str::to_string),
                require_api_key,
            ))
    }

    async fn call(app: Router, key: Option<&str>) -> (StatusCode, String) {
        let mut builder = Request::builder().uri("/stats");
        if let Some(key) = key {
            builder = builder.header("X-Api-Key", key);
        }
        let response = app.oneshot(builder.body(Body::empty()).unwrap()).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn open_when_no_key_configured() {
        let (status, _) = call(guarded(None), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn matching_key_passes() {
        let (status, body) = call(guarded(Some("s3cret")), Some("s3cret")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn missing_and_wrong_keys_are_rejected() {
        let (status, body) = call(guarded(Some("s3cret")), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("Missing X-Api-Key header"));

        let (status, body) = call(guarded(Some("s3cret")), Some("S3CRET")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("Invalid API key"));

        // no trimming
        let (status, _) = call(guarded(Some("s3cret ")), Some("s3cret")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn constant_time_eq_compares_length_and_content() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"", b""));
    }
}
