//! Text-to-field coercion shared by forms, query strings and path parameters.

use bytes::Bytes;
use prost_reflect::{DynamicMessage, FieldDescriptor, Kind, MessageDescriptor, ReflectMessage, Value};

use super::{json, CodecError};
use crate::descriptor::lookup_field;

/// Parse one raw value into the field's kind.
///
/// Messages are parsed as JSON; text that is not valid JSON is retried as a
/// JSON string, which covers well-known types such as timestamps.
pub fn parse_scalar(field: &FieldDescriptor, kind: &Kind, raw: &[u8]) -> Result<Value, CodecError> {
    let value = match kind {
        Kind::Bytes => Value::Bytes(Bytes::copy_from_slice(raw)),
        Kind::Message(desc) => Value::Message(parse_message(desc, raw)?),
        Kind::String => Value::String(text(field, raw)?.to_owned()),
        Kind::Bool => {
            let t = text(field, raw)?;
            let parsed = parse_bool(t)
                .ok_or_else(|| CodecError::field(field.name(), format!("`{t}` is not a boolean")))?;
            Value::Bool(parsed)
        }
        Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => Value::I32(number(field, raw)?),
        Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => Value::I64(number(field, raw)?),
        Kind::Uint32 | Kind::Fixed32 => Value::U32(number(field, raw)?),
        Kind::Uint64 | Kind::Fixed64 => Value::U64(number(field, raw)?),
        Kind::Float => Value::F32(number(field, raw)?),
        Kind::Double => Value::F64(number(field, raw)?),
        Kind::Enum(desc) => {
            let t = text(field, raw)?;
            match desc.get_value_by_name(t) {
                Some(v) => Value::EnumNumber(v.number()),
                None => {
                    let number = t.parse().map_err(|_| {
                        CodecError::field(field.name(), format!("unknown enum value `{t}`"))
                    })?;
                    Value::EnumNumber(number)
                }
            }
        }
    };
    Ok(value)
}

fn text<'a>(field: &FieldDescriptor, raw: &'a [u8]) -> Result<&'a str, CodecError> {
    std::str::from_utf8(raw)
        .map(str::trim)
        .map_err(|e| CodecError::field(field.name(), e))
}

fn number<T>(field: &FieldDescriptor, raw: &[u8]) -> Result<T, CodecError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let t = text(field, raw)?;
    t.parse()
        .map_err(|e| CodecError::field(field.name(), format!("`{t}`: {e}")))
}

fn parse_message(desc: &MessageDescriptor, raw: &[u8]) -> Result<DynamicMessage, CodecError> {
    json::from_slice(desc, raw).or_else(|first| {
        let quoted = serde_json::Value::String(String::from_utf8_lossy(raw).into_owned());
        json::from_value(desc, quoted).map_err(|_| first)
    })
}

fn parse_bool(text: &str) -> Option<bool> {
    match text {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// Set a field from one or more raw values.
///
/// Repeated fields accumulate every value. Map fields take JSON objects and
/// merge their entries. Singular fields keep the last value.
pub fn set_values<B: AsRef<[u8]>>(
    message: &mut DynamicMessage,
    field: &FieldDescriptor,
    raws: &[B],
) -> Result<(), CodecError> {
    if raws.is_empty() {
        return Ok(());
    }

    if field.is_map() {
        let desc = message.descriptor();
        for raw in raws {
            let entries: serde_json::Value = serde_json::from_slice(raw.as_ref())?;
            let mut object = serde_json::Map::new();
            object.insert(field.json_name().to_owned(), entries);
            let partial = json::from_value(&desc, serde_json::Value::Object(object))?;
            if let Value::Map(parsed) = partial.get_field(field).into_owned() {
                if let Some(map) = message.get_field_mut(field).as_map_mut() {
                    map.extend(parsed);
                }
            }
        }
        return Ok(());
    }

    let kind = field.kind();
    if field.is_list() {
        let parsed = raws
            .iter()
            .map(|raw| parse_scalar(field, &kind, raw.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(list) = message.get_field_mut(field).as_list_mut() {
            list.extend(parsed);
        }
        return Ok(());
    }

    let last = raws[raws.len() - 1].as_ref();
    message.set_field(field, parse_scalar(field, &kind, last)?);
    Ok(())
}

/// Set a dotted field path such as `address.city`. Returns `Ok(false)` when
/// the path does not name a field.
pub fn set_path<B: AsRef<[u8]>>(
    message: &mut DynamicMessage,
    path: &str,
    raws: &[B],
) -> Result<bool, CodecError> {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let Some(field) = lookup_field(&message.descriptor(), head) else {
        return Ok(false);
    };

    match rest {
        None => {
            set_values(message, &field, raws)?;
            Ok(true)
        }
        Some(_) if field.is_list() || field.is_map() => Ok(false),
        Some(rest) => match message.get_field_mut(&field) {
            Value::Message(child) => set_path(child, rest, raws),
            _ => Ok(false),
        },
    }
}
