//! HTTP listener setup.
//!
//! # Responsibilities
//! - Hold the shared state every dispatched request reads
//! - Build the axum router with the tower-http middleware stack
//!
//! # Design Decisions
//! - One fallback handler; routing happens against the live `RouteTable`, not
//!   axum's static router, so registrations never rebuild the service
//! - Request ids are generated before tracing so every span carries one

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use axum::response::{IntoResponse, Response};
use axum::Router;
use tonic::Status;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::error::status_response;
use crate::http::dispatch::dispatch;
use crate::http::request::X_REQUEST_ID;
use crate::interceptor::recover::panic_message;
use crate::interceptor::{AccessPolicy, InterceptorChain};
use crate::load_balancer::BalancerRegistry;
use crate::proxy::PassthroughProxy;
use crate::routing::RouteTable;

/// Limits and defaults for dispatched calls.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub max_body_size: usize,
    /// Deadline for unary calls, sent as `grpc-timeout`.
    pub request_timeout: Duration,
    pub sse_retry: Option<Duration>,
    /// Capacity of per-call message channels.
    pub stream_buffer: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_body_size: 4 * 1024 * 1024,
            request_timeout: Duration::from_secs(30),
            sse_retry: Some(Duration::from_millis(3000)),
            stream_buffer: 32,
        }
    }
}

/// Application state injected into the dispatch handler.
#[derive(Clone)]
pub struct AppState {
    pub routes: Arc<RouteTable>,
    pub balancers: Arc<BalancerRegistry>,
    pub interceptors: InterceptorChain,
    pub policy: Arc<dyn AccessPolicy>,
    pub proxy: Arc<PassthroughProxy>,
    pub settings: Arc<DispatchSettings>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("routes", &self.routes.len())
            .field("balancers", &self.balancers.len())
            .field("interceptors", &self.interceptors)
            .field("settings", &self.settings)
            .finish()
    }
}

/// Build the router for the HTTP listener.
#[allow(deprecated)]
pub fn router(state: AppState) -> Router {
    let settings = state.settings.clone();
    // The timeout covers the whole exchange; streaming bodies are unaffected.
    let timeout = settings.request_timeout + Duration::from_secs(1);

    Router::new().fallback(dispatch).with_state(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
            .layer(CatchPanicLayer::custom(panic_response))
            .layer(TimeoutLayer::new(timeout))
            .map_response(IntoResponse::into_response)
            .layer(RequestBodyLimitLayer::new(settings.max_body_size)),
    )
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    tracing::error!(panic = %panic_message(&*panic), "Handler panicked");
    status_response(&Status::internal("handler panicked"))
}
