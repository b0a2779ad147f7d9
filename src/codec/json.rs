//! Protobuf JSON mapping for dynamic messages.
//!
//! Responses keep unpopulated fields and write enums as numbers. Requests
//! ignore unknown fields and treat an empty body as the default message.

use prost_reflect::{DeserializeOptions, DynamicMessage, MessageDescriptor, SerializeOptions};

use super::CodecError;

pub const MIME: &str = "application/json";

fn serialize_options() -> SerializeOptions {
    SerializeOptions::new()
        .skip_default_fields(false)
        .use_enum_numbers(true)
}

fn deserialize_options() -> DeserializeOptions {
    DeserializeOptions::new().deny_unknown_fields(false)
}

pub fn to_vec(message: &DynamicMessage) -> Result<Vec<u8>, CodecError> {
    let mut serializer = serde_json::Serializer::new(Vec::new());
    message.serialize_with_options(&mut serializer, &serialize_options())?;
    Ok(serializer.into_inner())
}

pub fn to_string(message: &DynamicMessage) -> Result<String, CodecError> {
    let bytes = to_vec(message)?;
    String::from_utf8(bytes).map_err(|e| CodecError::Encode(e.to_string()))
}

pub fn to_value(message: &DynamicMessage) -> Result<serde_json::Value, CodecError> {
    Ok(message.serialize_with_options(serde_json::value::Serializer, &serialize_options())?)
}

pub fn from_slice(desc: &MessageDescriptor, bytes: &[u8]) -> Result<DynamicMessage, CodecError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(DynamicMessage::new(desc.clone()));
    }
    let mut deserializer = serde_json::Deserializer::from_slice(bytes);
    let message =
        DynamicMessage::deserialize_with_options(desc.clone(), &mut deserializer, &deserialize_options())?;
    deserializer.end()?;
    Ok(message)
}

pub fn from_value(
    desc: &MessageDescriptor,
    value: serde_json::Value,
) -> Result<DynamicMessage, CodecError> {
    Ok(DynamicMessage::deserialize_with_options(
        desc.clone(),
        value,
        &deserialize_options(),
    )?)
}

/// Decode a client-stream body: either one top-level array or successive JSON values.
pub fn decode_stream(
    desc: &MessageDescriptor,
    bytes: &[u8],
) -> Result<Vec<DynamicMessage>, CodecError> {
    let trimmed = bytes.trim_ascii_start();
    if trimmed.starts_with(b"[") {
        let values: Vec<serde_json::Value> = serde_json::from_slice(trimmed)?;
        return values.into_iter().map(|v| from_value(desc, v)).collect();
    }

    serde_json::Deserializer::from_slice(trimmed)
        .into_iter::<serde_json::Value>()
        .map(|value| from_value(desc, value?))
        .collect()
}
