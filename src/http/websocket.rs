//! WebSocket delivery for streaming calls.
//!
//! # Data Flow
//! ```text
//! client frames ──► reader task ──► mpsc ──► upstream request stream   (bidi only)
//! upstream replies ──► one text frame per message ──► client
//! ```
//!
//! # Design Decisions
//! - The backend connection is checked out once the interceptor chain passes
//!   the call, and is released when the reply ends
//! - A mid-stream error is sent as one error frame, then the socket closes
//! - A bad client frame ends the reader, which half-closes the upstream call

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use prost_reflect::{DynamicMessage, MessageDescriptor};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Status;

use crate::codec::json;
use crate::http::request::ParamOverlay;
use crate::http::response::error_json;
use crate::http::upstream::Upstream;
use crate::interceptor::{Call, InterceptorChain, Payload, Reply, ReplyStream};

/// Everything a bidi session needs once the socket is up.
pub struct BidiSession {
    pub chain: InterceptorChain,
    pub upstream: Upstream,
    pub call: Call,
    pub request: MessageDescriptor,
    pub overlay: ParamOverlay,
    pub capacity: usize,
}

/// Run a server-streaming call and forward each reply as a text frame.
pub async fn serve_server_stream(
    socket: WebSocket,
    chain: InterceptorChain,
    upstream: Upstream,
    call: Call,
) {
    let method = call.info.full_method.clone();
    let (mut sink, _source) = socket.split();

    match chain.run(call, &upstream).await {
        Ok(reply) => forward_reply(&mut sink, reply).await,
        Err(status) => send_error(&mut sink, &status).await,
    }
    let _ = sink.send(Message::Close(None)).await;
    tracing::debug!(method = %method, "WebSocket server stream closed");
}

/// Run a bidi call: client frames feed the upstream, replies go back in order.
pub async fn serve_bidi(socket: WebSocket, session: BidiSession) {
    let BidiSession {
        chain,
        upstream,
        mut call,
        request,
        overlay,
        capacity,
    } = session;
    let method = call.info.full_method.clone();
    let (mut sink, source) = socket.split();

    let (tx, rx) = mpsc::channel(capacity.max(1));
    let reader = tokio::spawn(read_frames(source, tx, request, overlay, method.clone()));
    call.payload = Payload::Stream(ReceiverStream::new(rx).boxed());

    match chain.run(call, &upstream).await {
        Ok(reply) => forward_reply(&mut sink, reply).await,
        Err(status) => send_error(&mut sink, &status).await,
    }
    reader.abort();
    let _ = sink.send(Message::Close(None)).await;
    tracing::debug!(method = %method, "WebSocket bidi stream closed");
}

async fn read_frames(
    mut source: SplitStream<WebSocket>,
    tx: mpsc::Sender<DynamicMessage>,
    desc: MessageDescriptor,
    overlay: ParamOverlay,
    method: String,
) {
    while let Some(frame) = source.next().await {
        let payload = match frame {
            Ok(Message::Text(text)) => text.as_str().as_bytes().to_vec(),
            Ok(Message::Binary(data)) => data.to_vec(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(method = %method, error = %e, "WebSocket read failed");
                break;
            }
        };

        let message = json::from_slice(&desc, &payload).and_then(|mut message| {
            overlay.apply(&mut message, true)?;
            Ok(message)
        });
        match message {
            Ok(message) => {
                if tx.send(message).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!(method = %method, error = %e, "Dropping undecodable WebSocket frame");
                break;
            }
        }
    }
}

async fn forward_reply(sink: &mut SplitSink<WebSocket, Message>, reply: Reply) {
    match reply {
        Reply::Unary(response) => {
            send_message(sink, response.get_ref()).await;
        }
        Reply::Stream(response) => forward_stream(sink, response.into_inner()).await,
    }
}

async fn forward_stream(sink: &mut SplitSink<WebSocket, Message>, mut stream: ReplyStream) {
    while let Some(item) = stream.next().await {
        match item {
            Ok(message) => {
                if !send_message(sink, &message).await {
                    return;
                }
            }
            Err(status) => {
                send_error(sink, &status).await;
                return;
            }
        }
    }
}

/// Returns false once the client is gone.
async fn send_message(sink: &mut SplitSink<WebSocket, Message>, message: &DynamicMessage) -> bool {
    match json::to_string(message) {
        Ok(text) => sink.send(Message::Text(text.into())).await.is_ok(),
        Err(e) => {
            send_error(sink, &Status::internal(e.to_string())).await;
            false
        }
    }
}

async fn send_error(sink: &mut SplitSink<WebSocket, Message>, status: &Status) {
    let _ = sink.send(Message::Text(error_json(status).into())).await;
}
