//! Shared utilities for integration testing: a dynamic `demo.Greeter`
//! backend and a gateway bound to ephemeral ports.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::response::Response;
use axum::Router;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use prost::Message;
use prost_reflect::{DescriptorPool, DynamicMessage, MessageDescriptor, Value};
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet,
    MethodDescriptorProto, ServiceDescriptorProto,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tonic::metadata::{MetadataMap, MetadataValue};
use tonic::server::StreamingService;
use tonic::{Code, Status, Streaming};

use rpc_gateway::codec::DynamicCodec;
use rpc_gateway::gateway::{EndpointSpec, Gateway, GatewayBuilder, ServiceSpec};
use rpc_gateway::lifecycle::Shutdown;

fn field(name: &str, number: i32, ty: Type) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.into()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(ty as i32),
        json_name: Some(name.into()),
        ..Default::default()
    }
}

fn method(name: &str, input: &str, output: &str, client: bool, server: bool) -> MethodDescriptorProto {
    MethodDescriptorProto {
        name: Some(name.into()),
        input_type: Some(input.into()),
        output_type: Some(output.into()),
        client_streaming: Some(client),
        server_streaming: Some(server),
        ..Default::default()
    }
}

fn message(name: &str, fields: Vec<FieldDescriptorProto>) -> DescriptorProto {
    DescriptorProto {
        name: Some(name.into()),
        field: fields,
        ..Default::default()
    }
}

/// `demo/greeter.proto`: one service covering all four call shapes.
pub fn greeter_set() -> FileDescriptorSet {
    let file = FileDescriptorProto {
        name: Some("demo/greeter.proto".into()),
        package: Some("demo".into()),
        syntax: Some("proto3".into()),
        message_type: vec![
            message("HelloRequest", vec![field("name", 1, Type::String)]),
            message("HelloReply", vec![field("message", 1, Type::String)]),
            message(
                "Chunk",
                vec![field("text", 1, Type::String), field("count", 2, Type::Int32)],
            ),
            message(
                "Summary",
                vec![field("joined", 1, Type::String), field("total", 2, Type::Int32)],
            ),
        ],
        service: vec![ServiceDescriptorProto {
            name: Some("Greeter".into()),
            method: vec![
                method("SayHello", ".demo.HelloRequest", ".demo.HelloReply", false, false),
                method("Countdown", ".demo.Chunk", ".demo.Chunk", false, true),
                method("Collect", ".demo.Chunk", ".demo.Summary", true, false),
                method("Chat", ".demo.Chunk", ".demo.Chunk", true, true),
            ],
            ..Default::default()
        }],
        ..Default::default()
    };
    FileDescriptorSet { file: vec![file] }
}

pub fn greeter_pool() -> DescriptorPool {
    DescriptorPool::from_file_descriptor_set(greeter_set()).unwrap()
}

pub fn message_type(name: &str) -> MessageDescriptor {
    greeter_pool().get_message_by_name(name).unwrap()
}

pub fn greeter_schema() -> Vec<u8> {
    serde_json::json!({
        "demo.Greeter/SayHello": [
            {
                "HttpMethod": "POST", "HttpUri": "/v1/greet",
                "InName": "HelloRequest", "InPkg": "demo",
                "OutName": "HelloReply", "OutPkg": "demo",
                "IsClientStream": false, "IsServerStream": false
            },
            {
                "HttpMethod": "GET", "HttpUri": "/v1/greet/{name}", "PathParams": ["name"],
                "InName": "HelloRequest", "InPkg": "demo",
                "OutName": "HelloReply", "OutPkg": "demo",
                "IsClientStream": false, "IsServerStream": false
            }
        ],
        "demo.Greeter/Countdown": [{
            "HttpMethod": "GET", "HttpUri": "/v1/countdown/{count}", "PathParams": ["count"],
            "InName": "Chunk", "InPkg": "demo", "OutName": "Chunk", "OutPkg": "demo",
            "IsClientStream": false, "IsServerStream": true
        }],
        "demo.Greeter/Collect": [{
            "HttpMethod": "POST", "HttpUri": "/v1/collect",
            "InName": "Chunk", "InPkg": "demo", "OutName": "Summary", "OutPkg": "demo",
            "IsClientStream": true, "IsServerStream": false
        }],
        "demo.Greeter/Chat": [{
            "HttpMethod": "GET", "HttpUri": "/v1/chat",
            "InName": "Chunk", "InPkg": "demo", "OutName": "Chunk", "OutPkg": "demo",
            "IsClientStream": true, "IsServerStream": true
        }]
    })
    .to_string()
    .into_bytes()
}

pub fn greeter_spec(endpoints: &[SocketAddr]) -> ServiceSpec {
    ServiceSpec {
        name: "greeter".into(),
        descriptor: greeter_set().encode_to_vec().into(),
        schema: greeter_schema().into(),
        endpoints: endpoints
            .iter()
            .map(|addr| EndpointSpec::new(addr.to_string(), 1))
            .collect(),
        strategy: "round_robin".into(),
    }
}

pub fn hello(name: &str) -> DynamicMessage {
    let mut msg = DynamicMessage::new(message_type("demo.HelloRequest"));
    msg.set_field_by_name("name", Value::String(name.into()));
    msg
}

pub fn chunk(text: &str, count: i32) -> DynamicMessage {
    let mut msg = DynamicMessage::new(message_type("demo.Chunk"));
    msg.set_field_by_name("text", Value::String(text.into()));
    msg.set_field_by_name("count", Value::I32(count));
    msg
}

pub fn text_field(msg: &DynamicMessage, name: &str) -> String {
    msg.get_field_by_name(name)
        .and_then(|v| v.as_str().map(str::to_owned))
        .unwrap_or_default()
}

pub fn int_field(msg: &DynamicMessage, name: &str) -> i32 {
    msg.get_field_by_name(name)
        .and_then(|v| v.as_i32())
        .unwrap_or_default()
}

type ReplyStream = BoxStream<'static, Result<DynamicMessage, Status>>;

/// Serves every `demo.Greeter` method as a bidirectional stream; the wire
/// format is the same for all four shapes.
struct Greeter {
    method: String,
    output: MessageDescriptor,
}

impl StreamingService<DynamicMessage> for Greeter {
    type Response = DynamicMessage;
    type ResponseStream = ReplyStream;
    type Future = BoxFuture<'static, Result<tonic::Response<ReplyStream>, Status>>;

    fn call(&mut self, request: tonic::Request<Streaming<DynamicMessage>>) -> Self::Future {
        let method = self.method.clone();
        let output = self.output.clone();
        Box::pin(async move { greeter(&method, output, request).await })
    }
}

async fn greeter(
    method: &str,
    output: MessageDescriptor,
    request: tonic::Request<Streaming<DynamicMessage>>,
) -> Result<tonic::Response<ReplyStream>, Status> {
    let forwarded = request
        .metadata()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let mut inbound = request.into_inner();

    match method {
        "SayHello" => {
            let req = first(&mut inbound).await?;
            let name = text_field(&req, "name");
            if let Some(code) = name.strip_prefix("code:") {
                let mut md = MetadataMap::new();
                md.insert("x-reason", MetadataValue::from_static("forced"));
                return Err(Status::with_metadata(
                    Code::from_i32(code.parse().unwrap_or(2)),
                    "forced failure",
                    md,
                ));
            }

            let mut reply = DynamicMessage::new(output);
            reply.set_field_by_name("message", Value::String(format!("Hello, {name}")));
            let mut response =
                tonic::Response::new(futures_util::stream::iter([Ok(reply)]).boxed());
            let md = response.metadata_mut();
            md.insert("x-greeting", MetadataValue::from_static("hi"));
            if name == "created" {
                md.insert("x-http-code", MetadataValue::from_static("201"));
            }
            if let Some(chain) = forwarded.and_then(|f| f.parse().ok()) {
                md.insert("x-seen-forwarded-for", chain);
            }
            Ok(response)
        }
        "Countdown" => {
            let req = first(&mut inbound).await?;
            let text = text_field(&req, "text");
            let count = int_field(&req, "count");

            let mut items: Vec<Result<DynamicMessage, Status>> =
                (1..=count).rev().map(|n| Ok(chunk(&text, n))).collect();
            if text == "fail" {
                items.truncate(1);
                let mut md = MetadataMap::new();
                md.insert("x-reason", MetadataValue::from_static("halted"));
                items.push(Err(Status::with_metadata(Code::Aborted, "halted", md)));
            }
            Ok(tonic::Response::new(futures_util::stream::iter(items).boxed()))
        }
        "Collect" => {
            let mut texts = Vec::new();
            let mut total = 0;
            while let Some(msg) = inbound.message().await? {
                texts.push(text_field(&msg, "text"));
                total += int_field(&msg, "count");
            }
            let mut summary = DynamicMessage::new(output);
            summary.set_field_by_name("joined", Value::String(texts.join(",")));
            summary.set_field_by_name("total", Value::I32(total));
            Ok(tonic::Response::new(
                futures_util::stream::iter([Ok(summary)]).boxed(),
            ))
        }
        "Chat" => {
            let replies = inbound.map(|item| {
                item.map(|msg| {
                    chunk(
                        &text_field(&msg, "text").to_uppercase(),
                        int_field(&msg, "count") + 1,
                    )
                })
            });
            Ok(tonic::Response::new(replies.boxed()))
        }
        other => Err(Status::unimplemented(format!("no method {other}"))),
    }
}

async fn first(inbound: &mut Streaming<DynamicMessage>) -> Result<DynamicMessage, Status> {
    inbound
        .message()
        .await?
        .ok_or_else(|| Status::invalid_argument("missing request message"))
}

async fn serve_backend(pool: DescriptorPool, request: Request) -> Response {
    let path = request.uri().path().to_owned();
    let found = path.strip_prefix("/demo.Greeter/").and_then(|name| {
        pool.get_service_by_name("demo.Greeter")?
            .methods()
            .find(|m| m.name() == name)
    });
    let Some(method) = found else {
        return Status::unimplemented(format!("unknown path {path}")).into_http::<Body>();
    };

    let service = Greeter {
        method: method.name().to_owned(),
        output: method.output(),
    };
    tonic::server::Grpc::new(DynamicCodec::new(method.input()))
        .streaming(service, request)
        .await
        .map(Body::new)
}

/// Start a `demo.Greeter` backend on an ephemeral port.
pub async fn start_backend() -> SocketAddr {
    let pool = greeter_pool();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let app = Router::new().fallback(move |request: Request| {
        let pool = pool.clone();
        async move { serve_backend(pool, request).await }
    });
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// A running gateway; shuts down on drop.
pub struct TestGateway {
    pub gateway: Arc<Gateway>,
    pub http: SocketAddr,
    pub grpc: SocketAddr,
    shutdown: Shutdown,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.http, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.http, path)
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn start_gateway(builder: GatewayBuilder) -> TestGateway {
    let gateway = Arc::new(builder.build());
    let http_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let grpc_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let http = http_listener.local_addr().unwrap();
    let grpc = grpc_listener.local_addr().unwrap();

    let (_updates_tx, updates) = mpsc::unbounded_channel();
    let shutdown = Shutdown::new();
    tokio::spawn(
        gateway
            .clone()
            .run(http_listener, grpc_listener, updates, shutdown.clone()),
    );

    TestGateway {
        gateway,
        http,
        grpc,
        shutdown,
    }
}

/// A gateway with the greeter registered against one fresh backend.
pub async fn start_greeter() -> (TestGateway, SocketAddr) {
    let backend = start_backend().await;
    let gw = start_gateway(Gateway::builder()).await;
    gw.gateway.register(greeter_spec(&[backend])).unwrap();
    (gw, backend)
}
