//! HTTP request → dynamically typed gRPC call → HTTP response.
//!
//! # Data Flow
//! ```text
//! Request
//!     → gRPC content-type? hand to the passthrough proxy
//!     → RouteTable::find (404 when missing or deleted)
//!     → metadata + body decode + param overlay
//!     → InterceptorChain
//!     → Upstream (BalancerRegistry::select → Endpoint::acquire → call)
//!     → unary JSON | SSE | length-prefixed | WebSocket
//! ```

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequestParts, Request, State};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use http::header::{CACHE_CONTROL, CONTENT_TYPE, UPGRADE};
use http::request::Parts;
use http::HeaderValue;
use prost_reflect::DynamicMessage;
use tonic::metadata::MetadataMap;
use tonic::Status;

use crate::codec::length_prefixed::encode_frame;
use crate::codec::sse::SseEncoder;
use crate::codec::{json, CodecError, Outbound};
use crate::descriptor::{HttpBinding, StreamShape};
use crate::error::GatewayError;
use crate::http::request::{build_metadata, decode_message, decode_messages, ParamOverlay, RequestContext};
use crate::http::response::{apply_metadata, error_json, error_response, unary_response};
use crate::http::server::AppState;
use crate::http::upstream::Upstream;
use crate::http::websocket::{self, BidiSession};
use crate::interceptor::{Call, CallInfo, Payload, Reply, ReplyStream};
use crate::observability::metrics;
use crate::proxy::is_grpc_request;
use crate::routing::RouteTarget;

/// Fallback handler for the HTTP listener.
pub async fn dispatch(State(state): State<AppState>, request: Request) -> Response {
    if is_grpc_request(request.headers()) {
        return state.proxy.clone().serve_http(request).await;
    }

    let started = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_owned();

    let Some(found) = state.routes.find(&method, &path) else {
        let response = GatewayError::RouteNotFound {
            method: method.to_string(),
            path,
        }
        .into_response();
        metrics::record_http_request(method.as_str(), "unmatched", response.status().as_u16(), started.elapsed());
        return response;
    };

    let route = found.route.pattern.template().to_owned();
    let response = match &found.route.target {
        RouteTarget::Bound(binding) => {
            match handle(&state, binding.clone(), found.params, request).await {
                Ok(response) => response,
                Err(err) => err.into_response(),
            }
        }
        RouteTarget::NotFound => GatewayError::RouteNotFound {
            method: method.to_string(),
            path,
        }
        .into_response(),
    };

    metrics::record_http_request(method.as_str(), &route, response.status().as_u16(), started.elapsed());
    response
}

/// Per-call values shared by every shape.
struct Prepared {
    binding: Arc<HttpBinding>,
    parts: Parts,
    body: Bytes,
    metadata: MetadataMap,
    key: Option<String>,
    info: Arc<CallInfo>,
    overlay: ParamOverlay,
}

async fn handle(
    state: &AppState,
    binding: Arc<HttpBinding>,
    params: Vec<(String, String)>,
    request: Request,
) -> Result<Response, GatewayError> {
    let (mut parts, body) = request.into_parts();
    let upgrade = if is_websocket_upgrade(&parts) {
        Some(
            WebSocketUpgrade::from_request_parts(&mut parts, &())
                .await
                .map_err(|e| GatewayError::BadRequest(e.body_text()))?,
        )
    } else {
        None
    };

    // The content hash covers the whole body and travels in the call headers,
    // so the body is read before any call opens.
    let body = axum::body::to_bytes(body, state.settings.max_body_size)
        .await
        .map_err(|e| CodecError::Body(e.to_string()))?;

    let ctx = RequestContext::from_parts(&parts);
    let metadata = build_metadata(&parts.headers, &ctx, &body);
    let key = ctx.balance_key(&metadata);
    let info = Arc::new(CallInfo {
        full_method: binding.full_method.clone(),
        shape: binding.shape,
        auth_required: state.policy.auth_required(&binding.full_method),
    });
    let overlay = ParamOverlay::new(params, parts.uri.query());

    tracing::debug!(
        request_id = %ctx.request_id,
        method = %binding.full_method,
        shape = binding.shape.as_str(),
        "Dispatching"
    );

    let prepared = Prepared {
        binding,
        parts,
        body,
        metadata,
        key,
        info,
        overlay,
    };

    match prepared.binding.shape {
        StreamShape::Unary => unary(state, prepared).await,
        StreamShape::ServerStream => server_stream(state, prepared, upgrade).await,
        StreamShape::ClientStream => client_stream(state, prepared).await,
        StreamShape::BidiStream => bidi_stream(state, prepared, upgrade).await,
    }
}

async fn unary(state: &AppState, prepared: Prepared) -> Result<Response, GatewayError> {
    let Prepared {
        binding,
        parts,
        body,
        metadata,
        key,
        info,
        overlay,
    } = prepared;

    let mut message = decode_message(&binding.request, &parts.headers, body).await?;
    overlay.apply(&mut message, false)?;

    let upstream = upstream_for(state, &binding, key, true);
    let call = Call {
        info,
        metadata,
        payload: Payload::Unary(message),
    };
    unary_reply(state.interceptors.run(call, &upstream).await)
}

async fn client_stream(state: &AppState, prepared: Prepared) -> Result<Response, GatewayError> {
    let Prepared {
        binding,
        parts,
        body,
        metadata,
        key,
        info,
        overlay,
    } = prepared;

    let mut messages = decode_messages(&binding.request, &parts.headers, body)?;
    for message in &mut messages {
        overlay.apply(message, true)?;
    }

    let upstream = upstream_for(state, &binding, key, false);
    let call = Call {
        info,
        metadata,
        payload: Payload::Stream(futures_util::stream::iter(messages).boxed()),
    };
    unary_reply(state.interceptors.run(call, &upstream).await)
}

async fn server_stream(
    state: &AppState,
    prepared: Prepared,
    upgrade: Option<WebSocketUpgrade>,
) -> Result<Response, GatewayError> {
    let Prepared {
        binding,
        parts,
        body,
        metadata,
        key,
        info,
        overlay,
    } = prepared;

    let mut message = decode_message(&binding.request, &parts.headers, body).await?;
    overlay.apply(&mut message, true)?;

    let upstream = upstream_for(state, &binding, key, false);
    let call = Call {
        info,
        metadata,
        payload: Payload::Unary(message),
    };

    if let Some(upgrade) = upgrade {
        let chain = state.interceptors.clone();
        return Ok(upgrade.on_upgrade(move |socket| {
            websocket::serve_server_stream(socket, chain, upstream, call)
        }));
    }

    let outbound = Outbound::from_headers(&parts.headers);
    match state.interceptors.run(call, &upstream).await {
        Ok(Reply::Stream(response)) => Ok(stream_response(response, outbound, state)),
        Ok(Reply::Unary(_)) => Err(Status::internal("unary reply to a streaming call").into()),
        Err(status) => Ok(error_response(&status)),
    }
}

async fn bidi_stream(
    state: &AppState,
    prepared: Prepared,
    upgrade: Option<WebSocketUpgrade>,
) -> Result<Response, GatewayError> {
    let Some(upgrade) = upgrade else {
        return Err(GatewayError::BadRequest(
            "bidirectional streaming requires a WebSocket upgrade".into(),
        ));
    };
    let Prepared {
        binding,
        metadata,
        key,
        info,
        overlay,
        ..
    } = prepared;

    let session = BidiSession {
        chain: state.interceptors.clone(),
        upstream: upstream_for(state, &binding, key, false),
        call: Call {
            info,
            metadata,
            payload: Payload::Stream(futures_util::stream::empty().boxed()),
        },
        request: binding.request.clone(),
        overlay,
        capacity: state.settings.stream_buffer,
    };
    Ok(upgrade.on_upgrade(move |socket| websocket::serve_bidi(socket, session)))
}

/// The terminal invoke for `binding`. Endpoint selection happens inside it.
fn upstream_for(
    state: &AppState,
    binding: &Arc<HttpBinding>,
    key: Option<String>,
    with_deadline: bool,
) -> Upstream {
    let timeout = with_deadline.then_some(state.settings.request_timeout);
    Upstream::new(state.balancers.clone(), binding.clone(), key, timeout)
}

fn unary_reply(reply: Result<Reply, Status>) -> Result<Response, GatewayError> {
    match reply {
        Ok(Reply::Unary(response)) => Ok(unary_response(response.get_ref(), response.metadata())?),
        Ok(Reply::Stream(_)) => Err(Status::internal("streaming reply to a unary call").into()),
        Err(status) => Ok(error_response(&status)),
    }
}

/// Encode a server stream as SSE or length-prefixed frames.
fn stream_response(
    response: tonic::Response<ReplyStream>,
    outbound: Outbound,
    state: &AppState,
) -> Response {
    let (metadata, stream, _) = response.into_parts();
    let items = until_error(stream);

    let mut response = match outbound {
        Outbound::LengthPrefixed => {
            let frames = items.map(|item| {
                let frame = match item {
                    Ok(message) => match json::to_vec(&message) {
                        Ok(bytes) => encode_frame(&bytes),
                        Err(e) => encode_frame(error_json(&Status::internal(e.to_string())).as_bytes()),
                    },
                    Err(status) => encode_frame(error_json(&status).as_bytes()),
                };
                Ok::<Bytes, Infallible>(frame)
            });
            let mut response = Response::new(Body::from_stream(frames));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static(Outbound::LengthPrefixed.content_type()),
            );
            response
                .headers_mut()
                .insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            response
        }
        Outbound::Json | Outbound::EventStream => {
            let mut sse = SseEncoder::new(state.settings.sse_retry);
            let events = items.map(move |item| {
                let event = match item {
                    Ok(message) => match json::to_string(&message) {
                        Ok(text) => sse.message(&text),
                        Err(e) => sse.error(&error_json(&Status::internal(e.to_string()))),
                    },
                    Err(status) => sse.error(&error_json(&status)),
                };
                Ok::<_, Infallible>(event)
            });
            Sse::new(events).keep_alive(KeepAlive::default()).into_response()
        }
    };

    apply_metadata(&mut response, &metadata);
    response
}

/// Yields replies up to and including the first upstream error.
fn until_error(
    stream: ReplyStream,
) -> impl Stream<Item = Result<DynamicMessage, Status>> + Send + 'static {
    futures_util::stream::unfold(Some(stream), |state| async move {
        let mut stream = state?;
        match stream.next().await? {
            Ok(message) => Some((Ok(message), Some(stream))),
            Err(status) => Some((Err(status), None)),
        }
    })
}

fn is_websocket_upgrade(parts: &Parts) -> bool {
    parts
        .headers
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

