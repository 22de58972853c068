//! Shared-key authentication for collaborator webhooks

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::warn;

/// Require the collaborator API key on the request.
///
/// The key is read from `X-API-Key`, or from an `Authorization: Bearer`
/// header when that is absent. Without a configured key every request is
/// rejected, so webhooks stay closed until a key is provisioned.
pub async fn webhook_auth_middleware(
    State(expected): State<Option<Arc<String>>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = expected else {
        warn!("Rejecting webhook: no collaborator API key configured");
        return Err(StatusCode::UNAUTHORIZED);
    };

    let provided = presented_key(&request).ok_or(StatusCode::UNAUTHORIZED)?;

    if provided.as_bytes().ct_eq(expected.as_bytes()).into() {
        Ok(next.run(request).await)
    } else {
        warn!("Rejecting webhook for {}: bad API key", request.uri().path());
        Err(StatusCode::UNAUTHORIZED)
    }
}

fn presented_key(request: &Request<Body>) -> Option<&str> {
    let headers = request.headers();
    headers
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::Request, middleware, routing::post, Router};
    use tower::ServiceExt;

    async fn accept() -> StatusCode {
        StatusCode::ACCEPTED
    }

    fn guarded(key: Option<&str>) -> Router {
        Router::new()
            .route("/hook", post(accept))
            .layer(middleware::from_fn_with_state(
                key.map(|k| Arc::new(k.to_string())),
                webhook_auth_middleware,
            ))
    }

    fn hook(header: Option<(&str, &str)>) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri("/hook");
        if let Some((name, value)) = header {
            builder = builder.header(name, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_missing_key_is_unauthorized() {
        let response = guarded(Some("secret")).oneshot(hook(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_wrong_key_is_unauthorized() {
        let response = guarded(Some("secret"))
            .oneshot(hook(Some(("X-API-Key", "guess"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_header_and_bearer_keys_accepted() {
        let response = guarded(Some("secret"))
            .oneshot(hook(Some(("X-API-Key", "secret"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let response = guarded(Some("secret"))
            .oneshot(hook(Some(("Authorization", "Bearer secret"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_unconfigured_key_rejects_everything() {
        let response = guarded(None)
            .oneshot(hook(Some(("X-API-Key", ""))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
