//! Request-side preparation for a dispatched call.
//!
//! # Responsibilities
//! - Turn inbound HTTP headers into gRPC metadata
//! - Inject request facts (id, method, uri, peer, protocol, body hash, identity)
//! - Decode the body into the binding's request message
//! - Overlay path and query parameters onto message fields
//!
//! # Design Decisions
//! - Path parameters must name a field; query parameters only need to for streaming calls
//! - `x-content-sha256` is always computed here, never trusted from the client

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use bytes::Bytes;
use http::header::HeaderName;
use http::request::Parts;
use http::{HeaderMap, Method, Uri, Version};
use prost_reflect::{DynamicMessage, MessageDescriptor};
use sha2::{Digest, Sha256};
use tonic::metadata::{AsciiMetadataKey, MetadataMap, MetadataValue};

use crate::codec::fields::set_path;
use crate::codec::form::FormFields;
use crate::codec::{http_body, json, length_prefixed, CodecError, Inbound};
use crate::proxy::middleware::{append_forwarded_for, client_ip};

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "transfer-encoding",
    "upgrade",
    "te",
    "trailer",
];

/// Header names that belong to the gRPC transport.
const GRPC_RESERVED: &[&str] = &["content-type", "user-agent"];

const GRPC_METADATA_PREFIX: &str = "grpc-metadata-";

pub(crate) fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.contains(&name)
}

/// Facts about the inbound request forwarded as metadata.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub remote: Option<SocketAddr>,
}

impl RequestContext {
    pub fn from_parts(parts: &Parts) -> Self {
        let request_id = parts
            .headers
            .get(&X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_owned)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let remote = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0);

        Self {
            request_id,
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            version: parts.version,
            remote,
        }
    }

    /// Key for hash-based balancing: the originating client IP.
    pub fn balance_key(&self, metadata: &MetadataMap) -> Option<String> {
        client_ip(metadata, self.remote).map(|ip| ip.to_string())
    }
}

/// Lowercase hex SHA-256 of the body; an empty body hashes as `{}`.
pub fn content_sha256(body: &[u8]) -> String {
    let input: &[u8] = if body.is_empty() { b"{}" } else { body };
    hex::encode(Sha256::digest(input))
}

/// Build outbound metadata from inbound headers and request facts.
pub fn build_metadata(headers: &HeaderMap, ctx: &RequestContext, body: &[u8]) -> MetadataMap {
    let mut metadata = MetadataMap::new();

    for (name, value) in headers {
        let name = name.as_str();
        if is_hop_by_hop(name)
            || name == "host"
            || name == "content-length"
            || name.starts_with("sec-")
            || GRPC_RESERVED.contains(&name)
        {
            continue;
        }
        let key = match name.strip_prefix(GRPC_METADATA_PREFIX) {
            Some(stripped) => stripped,
            None if name.starts_with("grpc-") => continue,
            None => name,
        };
        let (Ok(key), Ok(value)) = (
            AsciiMetadataKey::from_bytes(key.as_bytes()),
            MetadataValue::try_from(value.as_bytes()),
        ) else {
            continue;
        };
        metadata.append(key, value);
    }

    insert(&mut metadata, "x-request-id", &ctx.request_id);
    insert(&mut metadata, "x-http-method", ctx.method.as_str());
    insert(&mut metadata, "x-http-uri", &ctx.uri.to_string());
    insert(&mut metadata, "x-http-proto", &format!("{:?}", ctx.version));
    insert(&mut metadata, "x-content-sha256", &content_sha256(body));
    if let Some(remote) = ctx.remote {
        insert(&mut metadata, "x-remote-addr", &remote.to_string());
    }
    append_forwarded_for(&mut metadata, ctx.remote.map(|addr| addr.ip()), None);

    let identity = ["x-uid", "x-access-key"].iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
    });
    if let Some(identity) = identity {
        insert(&mut metadata, "x-identity", identity);
    }

    metadata
}

fn insert(metadata: &mut MetadataMap, key: &'static str, value: &str) {
    match MetadataValue::try_from(value) {
        Ok(value) => {
            metadata.insert(key, value);
        }
        Err(_) => tracing::debug!(key, "Skipping metadata value that is not valid ASCII"),
    }
}

/// Path and query parameters to copy onto every request message of a call.
#[derive(Debug, Clone, Default)]
pub struct ParamOverlay {
    path: Vec<(String, String)>,
    query: Vec<(String, Vec<String>)>,
}

impl ParamOverlay {
    pub fn new(path: Vec<(String, String)>, query: Option<&str>) -> Self {
        let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
        for (key, value) in url::form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
            match grouped.iter_mut().find(|(k, _)| *k == key) {
                Some((_, values)) => values.push(value.into_owned()),
                None => grouped.push((key.into_owned(), vec![value.into_owned()])),
            }
        }
        Self {
            path,
            query: grouped,
        }
    }

    /// Set the parameters on `message`. Unknown path keys always fail; unknown
    /// query keys fail only when `strict_query` is set.
    pub fn apply(&self, message: &mut DynamicMessage, strict_query: bool) -> Result<(), CodecError> {
        for (name, value) in &self.path {
            if !set_path(message, name, &[value.as_bytes()])? {
                return Err(CodecError::UnknownField(name.clone()));
            }
        }
        for (name, values) in &self.query {
            let known = set_path(message, name, values.as_slice())?;
            if !known && strict_query {
                return Err(CodecError::UnknownField(name.clone()));
            }
        }
        Ok(())
    }
}

/// Decode a single request message according to `Content-Type`.
pub async fn decode_message(
    desc: &MessageDescriptor,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<DynamicMessage, CodecError> {
    if http_body::is_http_body(desc) {
        return Ok(http_body::wrap(desc, body));
    }

    match Inbound::from_headers(headers) {
        Inbound::Json => json::from_slice(desc, &body),
        Inbound::Multipart => {
            let form = FormFields::from_multipart(headers, body).await?;
            from_form(desc, &form)
        }
        Inbound::UrlEncoded => from_form(desc, &FormFields::from_urlencoded(&body)),
        Inbound::LengthPrefixed => match length_prefixed::decode_frames(body)?.first() {
            Some(frame) => json::from_slice(desc, frame),
            None => Ok(DynamicMessage::new(desc.clone())),
        },
        Inbound::Binary => Err(CodecError::UnsupportedMediaType(
            http_body::OCTET_STREAM.to_owned(),
        )),
    }
}

/// Decode every message of a client-stream body, stopping at end of input.
pub fn decode_messages(
    desc: &MessageDescriptor,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Vec<DynamicMessage>, CodecError> {
    match Inbound::from_headers(headers) {
        Inbound::LengthPrefixed => length_prefixed::decode_frames(body)?
            .iter()
            .map(|frame| json::from_slice(desc, frame))
            .collect(),
        Inbound::Json => json::decode_stream(desc, &body),
        Inbound::Multipart => Err(CodecError::UnsupportedMediaType("multipart/form-data".into())),
        Inbound::UrlEncoded => Err(CodecError::UnsupportedMediaType(
            "application/x-www-form-urlencoded".into(),
        )),
        Inbound::Binary => Err(CodecError::UnsupportedMediaType(
            http_body::OCTET_STREAM.to_owned(),
        )),
    }
}

fn from_form(desc: &MessageDescriptor, form: &FormFields) -> Result<DynamicMessage, CodecError> {
    let mut message = DynamicMessage::new(desc.clone());
    form.apply(&mut message)?;
    Ok(message)
}
