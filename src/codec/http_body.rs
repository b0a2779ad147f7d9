//! `google.api.HttpBody` passthrough.
//!
//! A request bound to `HttpBody` receives the raw body in `data`; a response
//! of that type is written as its raw `data` with its own content type.

use bytes::Bytes;
use prost_reflect::{DynamicMessage, MessageDescriptor, ReflectMessage, Value};

pub const HTTP_BODY: &str = "google.api.HttpBody";
pub const OCTET_STREAM: &str = "application/octet-stream";

pub fn is_http_body(desc: &MessageDescriptor) -> bool {
    desc.full_name() == HTTP_BODY
}

/// Wrap a raw request body.
pub fn wrap(desc: &MessageDescriptor, body: Bytes) -> DynamicMessage {
    let mut message = DynamicMessage::new(desc.clone());
    if let Some(field) = desc.get_field_by_name("content_type") {
        message.set_field(&field, Value::String(OCTET_STREAM.to_owned()));
    }
    if let Some(field) = desc.get_field_by_name("data") {
        message.set_field(&field, Value::Bytes(body));
    }
    message
}

/// Split a response into `(content_type, data)`. `None` if the message is not an `HttpBody`.
pub fn unwrap(message: &DynamicMessage) -> Option<(String, Bytes)> {
    if !is_http_body(&message.descriptor()) {
        return None;
    }
    let content_type = message
        .get_field_by_name("content_type")
        .and_then(|v| v.as_str().map(str::to_owned))
        .filter(|ct| !ct.is_empty())
        .unwrap_or_else(|| OCTET_STREAM.to_owned());
    let data = message
        .get_field_by_name("data")
        .and_then(|v| v.as_bytes().cloned())
        .unwrap_or_default();
    Some((content_type, data))
}
