//! Response-side post-processing.
//!
//! # Responsibilities
//! - Copy permitted backend metadata onto HTTP headers
//! - Honor the `x-http-code` status override
//! - List every copied header once in `Access-Control-Expose-Headers`
//! - Encode unary replies (JSON, or raw bytes for `HttpBody`)

use axum::response::{IntoResponse, Response};
use http::header::{ACCESS_CONTROL_EXPOSE_HEADERS, CONTENT_TYPE};
use http::{HeaderName, HeaderValue, StatusCode};
use prost_reflect::DynamicMessage;
use tonic::metadata::MetadataMap;
use tonic::Status;

use crate::codec::{http_body, json, CodecError};
use crate::error::{status_response, ErrorBody};
use crate::http::request::is_hop_by_hop;

pub const X_HTTP_CODE: &str = "x-http-code";

const GRPC_METADATA_PREFIX: &str = "grpc-metadata-";

/// Transport headers that never come from the backend's metadata.
const SKIPPED: &[&str] = &["content-type", "content-length", "date", "server"];

/// Copy backend metadata onto `response`.
pub fn apply_metadata(response: &mut Response, metadata: &MetadataMap) {
    let headers = metadata.clone().into_headers();
    let mut exposed: Vec<HeaderName> = Vec::new();

    for (name, value) in &headers {
        let raw = name.as_str();
        if raw == X_HTTP_CODE {
            if let Some(status) = value
                .to_str()
                .ok()
                .and_then(|v| v.trim().parse::<u16>().ok())
                .and_then(|code| StatusCode::from_u16(code).ok())
            {
                *response.status_mut() = status;
            }
            continue;
        }

        let stripped = raw.strip_prefix(GRPC_METADATA_PREFIX).unwrap_or(raw);
        if stripped.starts_with("grpc-")
            || stripped.ends_with("-bin")
            || SKIPPED.contains(&stripped)
            || is_hop_by_hop(stripped)
        {
            continue;
        }
        let Ok(target) = HeaderName::from_bytes(stripped.as_bytes()) else {
            continue;
        };

        response.headers_mut().append(target.clone(), value.clone());
        if !exposed.contains(&target) {
            exposed.push(target);
        }
    }

    expose(response, &exposed);
}

/// Merge `names` into `Access-Control-Expose-Headers` without duplicates.
fn expose(response: &mut Response, names: &[HeaderName]) {
    if names.is_empty() {
        return;
    }
    let mut listed: Vec<String> = response
        .headers()
        .get_all(ACCESS_CONTROL_EXPOSE_HEADERS)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
        .collect();
    for name in names {
        if !listed.iter().any(|l| l == name.as_str()) {
            listed.push(name.as_str().to_owned());
        }
    }
    if let Ok(value) = HeaderValue::from_str(&listed.join(", ")) {
        response
            .headers_mut()
            .insert(ACCESS_CONTROL_EXPOSE_HEADERS, value);
    }
}

/// Encode a single reply message with its metadata.
pub fn unary_response(message: &DynamicMessage, metadata: &MetadataMap) -> Result<Response, CodecError> {
    let mut response = match http_body::unwrap(message) {
        Some((content_type, data)) => {
            let content_type = HeaderValue::from_str(&content_type)
                .unwrap_or(HeaderValue::from_static(http_body::OCTET_STREAM));
            ([(CONTENT_TYPE, content_type)], data).into_response()
        }
        None => (
            [(CONTENT_TYPE, HeaderValue::from_static(json::MIME))],
            json::to_vec(message)?,
        )
            .into_response(),
    };
    apply_metadata(&mut response, metadata);
    Ok(response)
}

/// An error body that also carries the status's metadata.
pub fn error_response(status: &Status) -> Response {
    let mut response = status_response(status);
    apply_metadata(&mut response, status.metadata());
    response
}

/// Error text for streaming transports.
pub fn error_json(status: &Status) -> String {
    serde_json::to_string(&ErrorBody::from_status(status)).unwrap_or_default()
}
