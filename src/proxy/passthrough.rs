//! Catch-all gRPC handler that forwards any registered method byte-for-byte.
//!
//! # Data Flow
//! ```text
//! inbound h2 stream
//!     → middlewares (may reject)
//!     → BalancerRegistry::select(method, client ip)
//!     → Endpoint::acquire (guard held by the response stream)
//!     → client::Grpc::streaming(same path, RawCodec)
//!     → inbound task feeds the outbound request channel
//!     → response stream drains the outbound Streaming
//!     → backend trailers merged into the final trailers frame
//! ```
//!
//! The backend's response headers are only released to the client after the
//! first inbound message was forwarded (or the inbound side finished).

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::response::Response;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use http::uri::PathAndQuery;
use http_body_util::BodyExt;
use http_body::Frame;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tokio_stream::wrappers::ReceiverStream;
use tonic::metadata::MetadataMap;
use tonic::server::StreamingService;
use tonic::{Code, Extensions, Status, Streaming};
use tracing::Instrument;

use super::codec::RawCodec;
use super::middleware::{append_forwarded_for, client_ip, ProxyMiddleware};
use crate::descriptor::StreamShape;
use crate::interceptor::{AccessPolicy, CallInfo, OpenAccess};
use crate::load_balancer::BalancerRegistry;
use crate::observability::metrics;
use crate::pool::PooledConnection;

type RawReplyStream = futures_util::stream::BoxStream<'static, Result<Bytes, Status>>;

/// Upstream trailers waiting for the response body's trailers frame.
type TrailerSlot = Arc<Mutex<Option<MetadataMap>>>;

const DEFAULT_BUFFER: usize = 32;

pub struct PassthroughProxy {
    balancers: Arc<BalancerRegistry>,
    middlewares: Vec<Arc<dyn ProxyMiddleware>>,
    policy: Arc<dyn AccessPolicy>,
    local_ip: OnceLock<IpAddr>,
    buffer: usize,
}

impl PassthroughProxy {
    pub fn new(balancers: Arc<BalancerRegistry>) -> Self {
        Self {
            balancers,
            middlewares: Vec::new(),
            policy: Arc::new(OpenAccess),
            local_ip: OnceLock::new(),
            buffer: DEFAULT_BUFFER,
        }
    }

    pub fn with_middleware(mut self, middleware: Arc<dyn ProxyMiddleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn AccessPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Capacity of the per-call inbound channel.
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    /// Record the listener address appended to `x-forwarded-for`. Only the first call wins.
    pub fn set_local_ip(&self, ip: IpAddr) {
        let _ = self.local_ip.set(ip);
    }

    /// Serve one h2 request as a bidirectional passthrough call.
    pub async fn serve_http(self: Arc<Self>, request: http::Request<Body>) -> Response {
        let path = request.uri().path().to_owned();
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0);
        let slot = TrailerSlot::default();

        let call = ProxyCall {
            proxy: self,
            path,
            peer,
            slot: slot.clone(),
        };
        let response = tonic::server::Grpc::new(RawCodec)
            .streaming(call, request)
            .await;

        response.map(move |body| Body::new(body.map_frame(move |frame| merge_trailers(frame, &slot))))
    }

    async fn proxy(
        &self,
        path: String,
        peer: Option<SocketAddr>,
        slot: TrailerSlot,
        request: tonic::Request<Streaming<Bytes>>,
    ) -> Result<tonic::Response<RawReplyStream>, Status> {
        let record = CallRecord {
            method: path.clone(),
            started: Instant::now(),
        };
        match self.open(&path, peer, slot, request, &record).await {
            Ok(response) => Ok(response),
            Err(status) => {
                record.finish(status.code());
                Err(status)
            }
        }
    }

    async fn open(
        &self,
        path: &str,
        peer: Option<SocketAddr>,
        slot: TrailerSlot,
        request: tonic::Request<Streaming<Bytes>>,
        record: &CallRecord,
    ) -> Result<tonic::Response<RawReplyStream>, Status> {
        let (mut metadata, _, inbound) = request.into_parts();

        let info = CallInfo {
            full_method: path.to_owned(),
            shape: StreamShape::BidiStream,
            auth_required: self.policy.auth_required(path),
        };
        for middleware in &self.middlewares {
            middleware.before_proxy(&info, &mut metadata).await?;
        }

        let client = client_ip(&metadata, peer);
        let key = client.map(|ip| ip.to_string());
        let endpoint = self
            .balancers
            .select(path, key.as_deref())
            .map_err(|e| Status::unavailable(e.to_string()))?;
        tracing::Span::current().record("endpoint", endpoint.address());

        let mut conn = endpoint.acquire().await.map_err(|e| e.to_status())?;
        append_forwarded_for(&mut metadata, client, self.local_ip.get().copied());

        let mut grpc = tonic::client::Grpc::new((*conn).clone());
        if let Err(e) = grpc.ready().await {
            conn.mark_broken();
            return Err(Status::unavailable(format!(
                "backend {} not ready: {e}",
                endpoint.address()
            )));
        }
        let method = PathAndQuery::try_from(path)
            .map_err(|e| Status::internal(format!("invalid method path `{path}`: {e}")))?;

        let (tx, rx) = mpsc::channel(self.buffer);
        let (first_tx, mut first_rx) = oneshot::channel();
        let inbound_task = InboundTask(tokio::spawn(forward_inbound(inbound, tx, first_tx)));

        let outbound_request =
            tonic::Request::from_parts(metadata, Extensions::new(), ReceiverStream::new(rx));
        let call = grpc.streaming(outbound_request, method, RawCodec);
        tokio::pin!(call);

        let opened = tokio::select! {
            opened = &mut call => match opened {
                Ok(response) => {
                    let _ = (&mut first_rx).await;
                    Ok(response)
                }
                Err(status) => Err(status),
            },
            _ = &mut first_rx => call.await,
        };
        let response = opened?;
        tracing::debug!(method = %path, endpoint = %endpoint.address(), "Passthrough stream open");

        let (headers, outbound, _) = response.into_parts();
        let pump = Pump {
            outbound,
            inbound: Some(inbound_task),
            slot,
            record: record.clone(),
            _conn: conn,
        };
        Ok(tonic::Response::from_parts(headers, pump.into_stream(), Extensions::new()))
    }
}

impl std::fmt::Debug for PassthroughProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassthroughProxy")
            .field("middlewares", &self.middlewares.len())
            .field("local_ip", &self.local_ip.get())
            .field("buffer", &self.buffer)
            .finish()
    }
}

struct ProxyCall {
    proxy: Arc<PassthroughProxy>,
    path: String,
    peer: Option<SocketAddr>,
    slot: TrailerSlot,
}

impl StreamingService<Bytes> for ProxyCall {
    type Response = Bytes;
    type ResponseStream = RawReplyStream;
    type Future = BoxFuture<'static, Result<tonic::Response<Self::ResponseStream>, Status>>;

    fn call(&mut self, request: tonic::Request<Streaming<Bytes>>) -> Self::Future {
        let proxy = self.proxy.clone();
        let path = self.path.clone();
        let peer = self.peer;
        let slot = self.slot.clone();
        let span = tracing::info_span!(
            "grpc_proxy",
            method = %path,
            endpoint = tracing::field::Empty,
        );
        Box::pin(async move { proxy.proxy(path, peer, slot, request).await }.instrument(span))
    }
}

/// Forwards inbound messages until EOF. Dropping `tx` half-closes the outbound call.
async fn forward_inbound(
    mut inbound: Streaming<Bytes>,
    tx: mpsc::Sender<Bytes>,
    first: oneshot::Sender<()>,
) -> Result<(), Status> {
    let mut first = Some(first);
    while let Some(message) = inbound.message().await? {
        if tx.send(message).await.is_err() {
            break;
        }
        if let Some(first) = first.take() {
            let _ = first.send(());
        }
    }
    Ok(())
}

/// Aborts the inbound pump when the call is torn down.
struct InboundTask(JoinHandle<Result<(), Status>>);

impl Drop for InboundTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[derive(Clone)]
struct CallRecord {
    method: String,
    started: Instant,
}

impl CallRecord {
    fn finish(&self, code: Code) {
        let elapsed = self.started.elapsed();
        metrics::record_proxy_call(&self.method, code, elapsed);
        tracing::debug!(method = %self.method, code = ?code, elapsed_ms = elapsed.as_millis() as u64, "Passthrough call finished");
    }
}

enum Step {
    Inbound(Result<Result<(), Status>, JoinError>),
    Outbound(Result<Option<Bytes>, Status>),
}

enum Flow {
    Yield(Bytes),
    Fail(Status),
    End,
}

struct Pump {
    outbound: Streaming<Bytes>,
    inbound: Option<InboundTask>,
    slot: TrailerSlot,
    record: CallRecord,
    _conn: PooledConnection,
}

impl Pump {
    fn into_stream(self) -> RawReplyStream {
        futures_util::stream::unfold(Some(self), |state| async move {
            let mut pump = state?;
            match pump.step().await {
                Flow::Yield(bytes) => Some((Ok(bytes), Some(pump))),
                Flow::Fail(status) => {
                    pump.record.finish(status.code());
                    Some((Err(status), None))
                }
                Flow::End => {
                    pump.record.finish(Code::Ok);
                    None
                }
            }
        })
        .boxed()
    }

    async fn step(&mut self) -> Flow {
        loop {
            let step = match self.inbound.as_mut() {
                Some(task) => tokio::select! {
                    joined = &mut task.0 => Step::Inbound(joined),
                    message = self.outbound.message() => Step::Outbound(message),
                },
                None => Step::Outbound(self.outbound.message().await),
            };

            match step {
                // Half-close already happened when the task dropped its sender.
                Step::Inbound(Ok(Ok(()))) => self.inbound = None,
                Step::Inbound(Ok(Err(status))) => {
                    return Flow::Fail(Status::internal(format!(
                        "inbound stream failed: {}",
                        status.message()
                    )))
                }
                Step::Inbound(Err(_)) => {
                    return Flow::Fail(Status::internal("proxying should never reach this stage"))
                }
                Step::Outbound(Ok(Some(bytes))) => return Flow::Yield(bytes),
                Step::Outbound(Ok(None)) => {
                    return match self.outbound.trailers().await {
                        Ok(trailers) => {
                            *self.slot.lock() = trailers;
                            Flow::End
                        }
                        Err(status) => Flow::Fail(status),
                    }
                }
                Step::Outbound(Err(status)) => return Flow::Fail(status),
            }
        }
    }
}

/// Copy backend trailers into the trailers frame written by the server codec.
fn merge_trailers(frame: Frame<Bytes>, slot: &TrailerSlot) -> Frame<Bytes> {
    let mut trailers = match frame.into_trailers() {
        Ok(trailers) => trailers,
        Err(frame) => return frame,
    };
    if let Some(upstream) = slot.lock().take() {
        let upstream = upstream.into_headers();
        for (name, value) in upstream.iter() {
            if name.as_str().starts_with("grpc-") || trailers.contains_key(name) {
                continue;
            }
            trailers.append(name.clone(), value.clone());
        }
    }
    Frame::trailers(trailers)
}
