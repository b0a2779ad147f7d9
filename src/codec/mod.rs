//! Content-negotiated serialization.
//!
//! # Responsibilities
//! - Pick the request decoder from `Content-Type` and the response encoder from `Accept`
//! - Convert between HTTP payloads and `DynamicMessage`s of a runtime descriptor
//! - Provide the tonic codec used for dynamically typed backend calls

pub mod dynamic;
pub mod fields;
pub mod form;
pub mod http_body;
pub mod json;
pub mod length_prefixed;
pub mod sse;

use http::header::{ACCEPT, CONTENT_TYPE};
use http::HeaderMap;
use thiserror::Error;
use tonic::Code;

pub use dynamic::DynamicCodec;

/// Request body formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    Json,
    Multipart,
    UrlEncoded,
    Binary,
    LengthPrefixed,
}

impl Inbound {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let Some(content_type) = media_type(headers, CONTENT_TYPE) else {
            return Inbound::Json;
        };
        match content_type.as_str() {
            "multipart/form-data" => Inbound::Multipart,
            "application/x-www-form-urlencoded" => Inbound::UrlEncoded,
            "application/octet-stream" => Inbound::Binary,
            length_prefixed::MIME => Inbound::LengthPrefixed,
            _ => Inbound::Json,
        }
    }
}

/// Response body formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outbound {
    Json,
    EventStream,
    LengthPrefixed,
}

impl Outbound {
    /// JSON unless `Accept` names one of the streaming formats.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let Some(accept) = headers.get(ACCEPT).and_then(|v| v.to_str().ok()) else {
            return Outbound::Json;
        };
        let accept = accept.to_ascii_lowercase();
        if accept.contains(sse::MIME) {
            Outbound::EventStream
        } else if accept.contains(length_prefixed::MIME) {
            Outbound::LengthPrefixed
        } else {
            Outbound::Json
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Outbound::Json => json::MIME,
            Outbound::EventStream => sse::MIME,
            Outbound::LengthPrefixed => length_prefixed::MIME,
        }
    }
}

/// The lowercased media type of a header, without parameters.
fn media_type(headers: &HeaderMap, name: http::header::HeaderName) -> Option<String> {
    let value = headers.get(name)?.to_str().ok()?;
    let essence = value.split(';').next()?.trim();
    (!essence.is_empty()).then(|| essence.to_ascii_lowercase())
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid value for field `{field}`: {reason}")]
    Field { field: String, reason: String },

    #[error("unknown field `{0}`")]
    UnknownField(String),

    #[error("invalid multipart body: {0}")]
    Multipart(String),

    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("unsupported media type `{0}`")]
    UnsupportedMediaType(String),

    #[error("failed to read request body: {0}")]
    Body(String),

    #[error("failed to encode response: {0}")]
    Encode(String),
}

impl CodecError {
    pub fn code(&self) -> Code {
        match self {
            CodecError::Encode(_) => Code::Internal,
            _ => Code::InvalidArgument,
        }
    }

    pub(crate) fn field(field: &str, reason: impl ToString) -> Self {
        CodecError::Field {
            field: field.to_owned(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(name: http::header::HeaderName, value: &'static str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(name, HeaderValue::from_static(value));
        h
    }

    #[test]
    fn test_inbound_negotiation() {
        assert_eq!(Inbound::from_headers(&HeaderMap::new()), Inbound::Json);
        assert_eq!(
            Inbound::from_headers(&headers(CONTENT_TYPE, "multipart/form-data; boundary=x")),
            Inbound::Multipart
        );
        assert_eq!(
            Inbound::from_headers(&headers(CONTENT_TYPE, "Application/X-WWW-Form-Urlencoded")),
            Inbound::UrlEncoded
        );
        assert_eq!(
            Inbound::from_headers(&headers(CONTENT_TYPE, "application/octet-stream")),
            Inbound::Binary
        );
        assert_eq!(
            Inbound::from_headers(&headers(CONTENT_TYPE, "application/stream+json")),
            Inbound::LengthPrefixed
        );
        assert_eq!(
            Inbound::from_headers(&headers(CONTENT_TYPE, "application/json; charset=utf-8")),
            Inbound::Json
        );
    }

    #[test]
    fn test_outbound_negotiation() {
        assert_eq!(Outbound::from_headers(&HeaderMap::new()), Outbound::Json);
        assert_eq!(Outbound::from_headers(&headers(ACCEPT, "*/*")), Outbound::Json);
        assert_eq!(
            Outbound::from_headers(&headers(ACCEPT, "text/event-stream")),
            Outbound::EventStream
        );
        assert_eq!(
            Outbound::from_headers(&headers(ACCEPT, "application/stream+json, */*")),
            Outbound::LengthPrefixed
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(CodecError::UnknownField("x".into()).code(), Code::InvalidArgument);
        assert_eq!(CodecError::Encode("x".into()).code(), Code::Internal);
    }
}
