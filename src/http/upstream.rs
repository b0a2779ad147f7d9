//! The terminal step of the interceptor chain: a typed call on a pooled channel.
//!
//! The endpoint is picked and a connection checked out only here, after every
//! interceptor let the call through. Unary replies release the connection on
//! return; streaming replies carry it until the stream ends or is dropped.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use http::uri::PathAndQuery;
use prost_reflect::DynamicMessage;
use tonic::codec::Streaming;
use tonic::{Extensions, Status};

use crate::codec::DynamicCodec;
use crate::descriptor::{HttpBinding, StreamShape};
use crate::error::GatewayError;
use crate::interceptor::{Call, Invoke, Payload, Reply, ReplyStream};
use crate::load_balancer::BalancerRegistry;
use crate::pool::PooledConnection;

/// Invokes one bound method on an endpoint chosen at call time.
#[derive(Debug, Clone)]
pub struct Upstream {
    balancers: Arc<BalancerRegistry>,
    binding: Arc<HttpBinding>,
    key: Option<String>,
    timeout: Option<Duration>,
}

impl Upstream {
    pub fn new(
        balancers: Arc<BalancerRegistry>,
        binding: Arc<HttpBinding>,
        key: Option<String>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            balancers,
            binding,
            key,
            timeout,
        }
    }

    async fn checkout(&self) -> Result<PooledConnection, Status> {
        let endpoint = self
            .balancers
            .select(&self.binding.full_method, self.key.as_deref())
            .map_err(GatewayError::from)?;
        let conn = endpoint.acquire().await.map_err(GatewayError::from)?;
        Ok(conn)
    }

    async fn call(&self, call: Call) -> Result<Reply, Status> {
        let binding = &self.binding;
        let path = PathAndQuery::try_from(binding.full_method.as_str()).map_err(|e| {
            Status::internal(format!("invalid method path `{}`: {e}", binding.full_method))
        })?;
        let codec = DynamicCodec::new(binding.response.clone());

        let conn = self.checkout().await?;
        let mut grpc = tonic::client::Grpc::new((*conn).clone());
        grpc.ready()
            .await
            .map_err(|e| Status::unavailable(format!("backend not ready: {e}")))?;

        let Call {
            metadata, payload, ..
        } = call;

        match (binding.shape, payload) {
            (StreamShape::Unary, Payload::Unary(message)) => {
                let mut request = tonic::Request::from_parts(metadata, Extensions::new(), message);
                if let Some(timeout) = self.timeout {
                    request.set_timeout(timeout);
                }
                grpc.unary(request, path, codec).await.map(Reply::Unary)
            }
            (StreamShape::ServerStream, Payload::Unary(message)) => {
                let request = tonic::Request::from_parts(metadata, Extensions::new(), message);
                let response = grpc.server_streaming(request, path, codec).await?;
                Ok(Reply::Stream(response.map(|stream| holding(stream, conn))))
            }
            (StreamShape::ClientStream, Payload::Stream(messages)) => {
                let request = tonic::Request::from_parts(metadata, Extensions::new(), messages);
                grpc.client_streaming(request, path, codec)
                    .await
                    .map(Reply::Unary)
            }
            (StreamShape::BidiStream, Payload::Stream(messages)) => {
                let request = tonic::Request::from_parts(metadata, Extensions::new(), messages);
                let response = grpc.streaming(request, path, codec).await?;
                Ok(Reply::Stream(response.map(|stream| holding(stream, conn))))
            }
            (shape, _) => Err(Status::internal(format!(
                "payload does not fit a {} call",
                shape.as_str()
            ))),
        }
    }
}

/// Ties the pool guard to the lifetime of a reply stream.
fn holding(stream: Streaming<DynamicMessage>, conn: PooledConnection) -> ReplyStream {
    stream
        .map(move |item| {
            let _held = &conn;
            item
        })
        .boxed()
}

impl Invoke for Upstream {
    fn invoke(&self, call: Call) -> BoxFuture<'_, Result<Reply, Status>> {
        Box::pin(self.call(call))
    }
}
