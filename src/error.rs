//! Gateway error type and the gRPC to HTTP mapping.
//!
//! Every subsystem error converts into [`GatewayError`], which knows its gRPC
//! code. HTTP responses carry `{"code", "message", "data"}` with a status
//! derived from that code. `data` lists the decoded `grpc-status-details-bin`
//! entries, or is null when there are none.
//!
//! Messages for `Internal`, `Unknown` and `DataLoss` are replaced by fixed
//! text and their details are dropped; the real message only reaches the logs.

use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;
use prost::Message;
use prost_reflect::DynamicMessage;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tonic::{Code, Status};

use crate::codec::{json, CodecError};
use crate::config::ConfigError;
use crate::descriptor::{types, DescriptorError, SchemaError};
use crate::gateway::ServiceId;
use crate::load_balancer::LbError;
use crate::pool::PoolError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Balancer(#[from] LbError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("upstream returned {}: {}", .0.code(), .0.message())]
    Upstream(#[from] Status),

    #[error("no route for {method} {path}")]
    RouteNotFound { method: String, path: String },

    #[error("unknown service {0}")]
    UnknownService(ServiceId),

    #[error("unsupported update mask path `{0}`")]
    InvalidMask(String),

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    pub fn code(&self) -> Code {
        match self {
            GatewayError::Descriptor(_)
            | GatewayError::Schema(_)
            | GatewayError::InvalidMask(_)
            | GatewayError::BadRequest(_)
            | GatewayError::Config(_) => Code::InvalidArgument,
            GatewayError::Codec(e) => e.code(),
            GatewayError::Balancer(LbError::NoEndpoint(_)) => Code::Unavailable,
            GatewayError::Balancer(LbError::UnknownStrategy(_)) => Code::InvalidArgument,
            GatewayError::Pool(_) => Code::Unavailable,
            GatewayError::Upstream(status) => status.code(),
            GatewayError::RouteNotFound { .. } | GatewayError::UnknownService(_) => Code::NotFound,
            GatewayError::Io(_) => Code::Internal,
        }
    }

    pub fn to_status(&self) -> Status {
        match self {
            GatewayError::Upstream(status) => status.clone(),
            other => Status::new(other.code(), other.to_string()),
        }
    }
}

impl From<GatewayError> for Status {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Upstream(status) => status,
            other => other.to_status(),
        }
    }
}

/// HTTP status for a gRPC code.
pub fn http_status(code: Code) -> StatusCode {
    match code {
        Code::Ok => StatusCode::OK,
        Code::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
        Code::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        Code::InvalidArgument => StatusCode::BAD_REQUEST,
        Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::AlreadyExists => StatusCode::CONFLICT,
        Code::PermissionDenied => StatusCode::FORBIDDEN,
        Code::Unauthenticated => StatusCode::UNAUTHORIZED,
        Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
        Code::FailedPrecondition => StatusCode::BAD_REQUEST,
        Code::Aborted => StatusCode::CONFLICT,
        Code::OutOfRange => StatusCode::BAD_REQUEST,
        Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        Code::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        Code::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn is_opaque(code: Code) -> bool {
    matches!(code, Code::Internal | Code::Unknown | Code::DataLoss)
}

/// The message shown to clients for a status.
pub fn client_message(status: &Status) -> String {
    match status.code() {
        Code::Internal => "internal error".to_owned(),
        Code::Unknown => "unknown error".to_owned(),
        Code::DataLoss => "data loss".to_owned(),
        _ => status.message().to_owned(),
    }
}

/// `google.rpc.Status`, the payload of `grpc-status-details-bin`.
#[derive(Clone, PartialEq, Message)]
struct RpcStatus {
    #[prost(int32, tag = "1")]
    code: i32,
    #[prost(string, tag = "2")]
    message: String,
    #[prost(message, repeated, tag = "3")]
    details: Vec<prost_types::Any>,
}

/// Status details as JSON, one object per `Any`.
pub fn status_details(status: &Status) -> Option<Value> {
    if status.details().is_empty() || is_opaque(status.code()) {
        return None;
    }
    let rpc = match RpcStatus::decode(status.details()) {
        Ok(rpc) => rpc,
        Err(e) => {
            tracing::debug!(error = %e, "Undecodable status details");
            return None;
        }
    };
    if rpc.details.is_empty() {
        return None;
    }
    Some(Value::Array(rpc.details.iter().map(any_to_json).collect()))
}

/// A registered type renders as its JSON fields plus `@type`; anything else
/// keeps only `@type`.
fn any_to_json(any: &prost_types::Any) -> Value {
    let name = any.type_url.rsplit('/').next().unwrap_or_default();
    let decoded = types::global()
        .message(name)
        .and_then(|desc| DynamicMessage::decode(desc, any.value.as_slice()).ok())
        .and_then(|message| json::to_value(&message).ok());

    let mut object = match decoded {
        Some(Value::Object(fields)) => fields,
        _ => serde_json::Map::new(),
    };
    object.insert("@type".to_owned(), Value::String(any.type_url.clone()));
    Value::Object(object)
}

/// JSON error body.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorBody {
    pub code: i32,
    pub message: String,
    pub data: Option<Value>,
}

impl ErrorBody {
    pub fn from_status(status: &Status) -> Self {
        Self {
            code: status.code() as i32,
            message: client_message(status),
            data: status_details(status),
        }
    }
}

/// Render a status as an HTTP error response.
pub fn status_response(status: &Status) -> Response {
    let body = ErrorBody::from_status(status);
    if body.message != status.message() {
        tracing::error!(code = ?status.code(), message = %status.message(), "Request failed");
    } else {
        tracing::debug!(code = ?status.code(), message = %status.message(), "Request failed");
    }
    (http_status(status.code()), Json(body)).into_response()
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        status_response(&self.to_status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{fixtures, ServiceDescriptor};
    use http_body_util::BodyExt;

    fn with_details(code: Code, details: Vec<prost_types::Any>) -> Status {
        let rpc = RpcStatus {
            code: code as i32,
            message: "rejected".into(),
            details,
        };
        Status::with_details(code, "rejected", rpc.encode_to_vec().into())
    }

    #[test]
    fn test_documented_http_statuses() {
        let table = [
            (Code::Ok, 200),
            (Code::Internal, 500),
            (Code::InvalidArgument, 400),
            (Code::NotFound, 404),
            (Code::PermissionDenied, 403),
            (Code::Unauthenticated, 401),
            (Code::ResourceExhausted, 429),
            (Code::DeadlineExceeded, 504),
            (Code::Unavailable, 503),
            (Code::Cancelled, 499),
            (Code::Unimplemented, 501),
        ];
        for (code, expected) in table {
            assert_eq!(http_status(code).as_u16(), expected, "{code:?}");
        }
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            GatewayError::Balancer(LbError::NoEndpoint("/a.B/C".into())).code(),
            Code::Unavailable
        );
        assert_eq!(
            GatewayError::RouteNotFound {
                method: "GET".into(),
                path: "/x".into()
            }
            .code(),
            Code::NotFound
        );
        assert_eq!(
            GatewayError::Upstream(Status::permission_denied("no")).code(),
            Code::PermissionDenied
        );
        assert_eq!(
            GatewayError::Codec(CodecError::UnknownField("x".into())).code(),
            Code::InvalidArgument
        );
    }

    #[test]
    fn test_internal_details_are_hidden() {
        let body = ErrorBody::from_status(&Status::internal("db at 10.0.0.3 exploded"));
        assert_eq!(body.message, "internal error");
        assert_eq!(body.code, 13);

        let body = ErrorBody::from_status(&Status::not_found("no such user"));
        assert_eq!(body.message, "no such user");
    }

    #[tokio::test]
    async fn test_response_body_shape() {
        let response = GatewayError::BadRequest("missing name".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"code": 3, "message": "missing name", "data": null})
        );
    }

    #[test]
    fn test_status_details_surface_in_data() {
        ServiceDescriptor::load(fixtures::encode(&fixtures::greeter_set())).unwrap();
        let desc = types::global().message("demo.HelloReply").unwrap();
        let mut reply = DynamicMessage::new(desc);
        reply.set_field_by_name("message", prost_reflect::Value::String("try later".into()));

        let status = with_details(
            Code::FailedPrecondition,
            vec![
                prost_types::Any {
                    type_url: "type.googleapis.com/demo.HelloReply".into(),
                    value: reply.encode_to_vec(),
                },
                prost_types::Any {
                    type_url: "type.googleapis.com/acme.Unlisted".into(),
                    value: vec![1, 2, 3],
                },
            ],
        );

        let body = ErrorBody::from_status(&status);
        let data = body.data.unwrap();
        assert_eq!(data[0]["@type"], "type.googleapis.com/demo.HelloReply");
        assert_eq!(data[0]["message"], "try later");
        assert_eq!(
            data[1],
            serde_json::json!({"@type": "type.googleapis.com/acme.Unlisted"})
        );
    }

    #[test]
    fn test_status_details_hidden_or_absent() {
        let any = prost_types::Any {
            type_url: "type.googleapis.com/acme.Trace".into(),
            value: Vec::new(),
        };
        assert!(ErrorBody::from_status(&with_details(Code::Internal, vec![any])).data.is_none());
        assert!(ErrorBody::from_status(&with_details(Code::NotFound, Vec::new())).data.is_none());

        let garbage = Status::with_details(Code::NotFound, "gone", bytes::Bytes::from_static(b"\xff\xff"));
        assert!(ErrorBody::from_status(&garbage).data.is_none());
    }
}
