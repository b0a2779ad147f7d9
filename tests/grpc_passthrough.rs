//! Native gRPC traffic forwarded byte-for-byte through the gateway.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use http::uri::PathAndQuery;
use tonic::metadata::{MetadataMap, MetadataValue};
use tonic::transport::Channel;
use tonic::{Code, Status};

use rpc_gateway::codec::DynamicCodec;
use rpc_gateway::gateway::Gateway;
use rpc_gateway::interceptor::CallInfo;
use rpc_gateway::proxy::ProxyMiddleware;

mod common;

async fn grpc_client(addr: SocketAddr) -> tonic::client::Grpc<Channel> {
    let channel = Channel::from_shared(format!("http://{addr}"))
        .unwrap()
        .connect()
        .await
        .unwrap();
    let mut grpc = tonic::client::Grpc::new(channel);
    grpc.ready().await.unwrap();
    grpc
}

fn reply_codec(name: &str) -> DynamicCodec {
    DynamicCodec::new(common::message_type(name))
}

#[tokio::test]
async fn test_unary_through_grpc_listener() {
    let (gw, _backend) = common::start_greeter().await;
    let mut grpc = grpc_client(gw.grpc).await;

    let response = grpc
        .unary(
            tonic::Request::new(common::hello("Ada")),
            PathAndQuery::from_static("/demo.Greeter/SayHello"),
            reply_codec("demo.HelloReply"),
        )
        .await
        .unwrap();

    assert_eq!(common::text_field(response.get_ref(), "message"), "Hello, Ada");
    assert_eq!(response.metadata().get("x-greeting").unwrap(), "hi");
    let chain = response
        .metadata()
        .get("x-seen-forwarded-for")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(chain.starts_with("127.0.0.1"), "{chain}");
}

#[tokio::test]
async fn test_grpc_on_http_listener() {
    let (gw, _backend) = common::start_greeter().await;
    let mut grpc = grpc_client(gw.http).await;

    let response = grpc
        .unary(
            tonic::Request::new(common::hello("Lin")),
            PathAndQuery::from_static("/demo.Greeter/SayHello"),
            reply_codec("demo.HelloReply"),
        )
        .await
        .unwrap();
    assert_eq!(common::text_field(response.get_ref(), "message"), "Hello, Lin");
}

#[tokio::test]
async fn test_bidi_passthrough_in_order() {
    let (gw, _backend) = common::start_greeter().await;
    let mut grpc = grpc_client(gw.grpc).await;

    let outbound = futures_util::stream::iter(vec![
        common::chunk("a", 1),
        common::chunk("b", 2),
        common::chunk("c", 3),
    ]);
    let response = grpc
        .streaming(
            tonic::Request::new(outbound),
            PathAndQuery::from_static("/demo.Greeter/Chat"),
            reply_codec("demo.Chunk"),
        )
        .await
        .unwrap();

    let replies: Vec<(String, i32)> = response
        .into_inner()
        .map(|item| {
            let msg = item.unwrap();
            (common::text_field(&msg, "text"), common::int_field(&msg, "count"))
        })
        .collect()
        .await;
    assert_eq!(
        replies,
        vec![("A".into(), 2), ("B".into(), 3), ("C".into(), 4)]
    );
}

#[tokio::test]
async fn test_trailers_are_propagated() {
    let (gw, _backend) = common::start_greeter().await;
    let mut grpc = grpc_client(gw.grpc).await;

    let response = grpc
        .server_streaming(
            tonic::Request::new(common::chunk("fail", 3)),
            PathAndQuery::from_static("/demo.Greeter/Countdown"),
            reply_codec("demo.Chunk"),
        )
        .await
        .unwrap();
    let mut stream = response.into_inner();

    let first = stream.message().await.unwrap().unwrap();
    assert_eq!(common::int_field(&first, "count"), 3);

    let status = stream.message().await.unwrap_err();
    assert_eq!(status.code(), Code::Aborted);
    assert_eq!(status.message(), "halted");
    assert_eq!(status.metadata().get("x-reason").unwrap(), "halted");
}

#[tokio::test]
async fn test_unknown_method_is_unavailable() {
    let (gw, _backend) = common::start_greeter().await;
    let mut grpc = grpc_client(gw.grpc).await;

    let status = grpc
        .unary(
            tonic::Request::new(common::hello("x")),
            PathAndQuery::from_static("/demo.Greeter/Nope"),
            reply_codec("demo.HelloReply"),
        )
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unavailable);
}

struct DenyFlagged;

impl ProxyMiddleware for DenyFlagged {
    fn before_proxy<'a>(
        &'a self,
        _call: &'a CallInfo,
        metadata: &'a mut MetadataMap,
    ) -> BoxFuture<'a, Result<(), Status>> {
        Box::pin(async move {
            if metadata.contains_key("x-deny") {
                return Err(Status::permission_denied("denied by policy"));
            }
            Ok(())
        })
    }
}

#[tokio::test]
async fn test_middleware_can_reject() {
    let backend = common::start_backend().await;
    let gw = common::start_gateway(Gateway::builder().proxy_middleware(Arc::new(DenyFlagged))).await;
    gw.gateway.register(common::greeter_spec(&[backend])).unwrap();
    let mut grpc = grpc_client(gw.grpc).await;

    let mut request = tonic::Request::new(common::hello("x"));
    request
        .metadata_mut()
        .insert("x-deny", MetadataValue::from_static("1"));
    let status = grpc
        .unary(
            request,
            PathAndQuery::from_static("/demo.Greeter/SayHello"),
            reply_codec("demo.HelloReply"),
        )
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::PermissionDenied);

    grpc.ready().await.unwrap();
    let ok = grpc
        .unary(
            tonic::Request::new(common::hello("y")),
            PathAndQuery::from_static("/demo.Greeter/SayHello"),
            reply_codec("demo.HelloReply"),
        )
        .await
        .unwrap();
    assert_eq!(common::text_field(ok.get_ref(), "message"), "Hello, y");
}
