//! Router for the internal gRPC listener.

use std::sync::Arc;

use axum::extract::Request;
use axum::Router;
use http::header::CONTENT_TYPE;
use http::HeaderMap;
use tower_http::trace::TraceLayer;

use super::PassthroughProxy;

/// Every path is handed to the passthrough proxy.
pub fn router(proxy: Arc<PassthroughProxy>) -> Router {
    Router::new()
        .fallback(move |request: Request| {
            let proxy = proxy.clone();
            async move { proxy.serve_http(request).await }
        })
        .layer(TraceLayer::new_for_grpc())
}

pub fn is_grpc_request(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/grpc"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_is_grpc_request() {
        let mut headers = HeaderMap::new();
        assert!(!is_grpc_request(&headers));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/grpc+proto"));
        assert!(is_grpc_request(&headers));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        assert!(!is_grpc_request(&headers));
    }
}
