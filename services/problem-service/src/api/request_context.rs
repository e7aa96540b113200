//! Request-scoped context extracted from HTTP requests.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderName, HeaderValue, Request};
use desk_id::RequestId;
use tower_http::request_id::{MakeRequestId, RequestId as RequestIdHeader};

use crate::api::error::ApiError;

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let request_id = parts
            .headers
            .get(&REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| RequestId::new().to_string());

        Ok(Self { request_id })
    }
}

/// Generates `req_<ulid>` ids for requests that arrive without one.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeDeskRequestId;

impl MakeRequestId for MakeDeskRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestIdHeader> {
        HeaderValue::from_str(&RequestId::new().to_string())
            .ok()
            .map(RequestIdHeader::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, routing::get, Router};
    use tower::ServiceExt;
    use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};

    async fn extract(request: Request<()>) -> RequestContext {
        let (mut parts, _) = request.into_parts();
        RequestContext::from_request_parts(&mut parts, &()).await.unwrap()
    }

    #[tokio::test]
    async fn test_uses_incoming_request_id() {
        let request = Request::builder()
            .header("x-request-id", "req_from_caller")
            .body(())
            .unwrap();

        assert_eq!(extract(request).await.request_id, "req_from_caller");
    }

    #[tokio::test]
    async fn test_generates_request_id_when_missing() {
        let request = Request::builder().body(()).unwrap();

        let ctx = extract(request).await;
        assert!(ctx.request_id.parse::<RequestId>().is_ok());
    }

    #[test]
    fn test_make_request_id_is_prefixed() {
        let request = Request::builder().body(()).unwrap();
        let id = MakeDeskRequestId.make_request_id(&request).unwrap();

        assert!(id.header_value().to_str().unwrap().starts_with("req_"));
    }

    #[tokio::test]
    async fn test_generated_id_reaches_handler_and_response() {
        let app = Router::new()
            .route("/", get(|ctx: RequestContext| async move { ctx.request_id }))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeDeskRequestId));

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let header = response.headers()["x-request-id"].to_str().unwrap().to_string();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(header.starts_with("req_"));
        assert_eq!(body, header.as_bytes());
    }
}
