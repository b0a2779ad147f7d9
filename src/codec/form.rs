//! Form bodies (`multipart/form-data` and `application/x-www-form-urlencoded`).
//!
//! Both are collected into [`FormFields`] and mapped onto a message the same
//! way: JSON name first, then proto name, unknown names ignored.

use axum::body::Body;
use axum::extract::{FromRequest, Multipart, Request};
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::HeaderMap;
use prost_reflect::{DynamicMessage, FieldDescriptor, Kind, MessageDescriptor, ReflectMessage, Value};

use super::fields::set_values;
use super::CodecError;

const FIELD_MASK: &str = "google.protobuf.FieldMask";

/// Form values in arrival order, grouped by name.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FormFields {
    entries: Vec<(String, Vec<Bytes>)>,
}

impl FormFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &str, value: Bytes) {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some((_, values)) => values.push(value),
            None => self.entries.push((name.to_owned(), vec![value])),
        }
    }

    pub fn get(&self, name: &str) -> Option<&[Bytes]> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn from_urlencoded(body: &[u8]) -> Self {
        let mut fields = Self::new();
        for (name, value) in url::form_urlencoded::parse(body) {
            fields.push(&name, Bytes::from(value.into_owned()));
        }
        fields
    }

    /// Read every text field and file part. Only the first file per name is kept.
    pub async fn from_multipart(headers: &HeaderMap, body: Bytes) -> Result<Self, CodecError> {
        let mut request = Request::new(Body::from(body));
        if let Some(content_type) = headers.get(CONTENT_TYPE) {
            request.headers_mut().insert(CONTENT_TYPE, content_type.clone());
        }

        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| CodecError::Multipart(e.body_text()))?;

        let mut fields = Self::new();
        let mut files_seen: Vec<String> = Vec::new();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| CodecError::Multipart(e.body_text()))?
        {
            let Some(name) = field.name().map(str::to_owned) else {
                continue;
            };
            let is_file = field.file_name().is_some();
            let data = field
                .bytes()
                .await
                .map_err(|e| CodecError::Multipart(e.body_text()))?;

            if is_file {
                if files_seen.contains(&name) {
                    continue;
                }
                files_seen.push(name.clone());
            }
            fields.push(&name, data);
        }
        Ok(fields)
    }

    /// Map the fields onto `message`, recording every set top-level field in
    /// the message's `FieldMask`, if it has one.
    pub fn apply(&self, message: &mut DynamicMessage) -> Result<(), CodecError> {
        let desc = message.descriptor();
        let mask_field = field_mask_of(&desc);
        let mut set_paths = Vec::new();

        for (name, values) in &self.entries {
            let Some(field) = desc
                .get_field_by_json_name(name)
                .or_else(|| desc.get_field_by_name(name))
            else {
                tracing::trace!(field = %name, "Ignoring unknown form field");
                continue;
            };
            set_values(message, &field, values)?;
            if mask_field.as_ref() != Some(&field) {
                set_paths.push(Value::String(field.name().to_owned()));
            }
        }

        if let Some(mask_field) = mask_field {
            if !set_paths.is_empty() {
                record_paths(message, &mask_field, set_paths);
            }
        }
        Ok(())
    }
}

fn field_mask_of(desc: &MessageDescriptor) -> Option<FieldDescriptor> {
    desc.fields().find(|f| {
        !f.is_list() && matches!(f.kind(), Kind::Message(m) if m.full_name() == FIELD_MASK)
    })
}

fn record_paths(message: &mut DynamicMessage, mask_field: &FieldDescriptor, paths: Vec<Value>) {
    if let Value::Message(mask) = message.get_field_mut(mask_field) {
        if let Some(existing) = mask
            .descriptor()
            .get_field_by_name("paths")
            .map(|f| mask.get_field_mut(&f))
            .and_then(Value::as_list_mut)
        {
            existing.extend(paths);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::fixtures;
    use http::HeaderValue;

    fn profile() -> DynamicMessage {
        DynamicMessage::new(fixtures::profile_pool().get_message_by_name("demo.Profile").unwrap())
    }

    fn mask_paths(msg: &DynamicMessage) -> Vec<String> {
        let mask = msg.get_field_by_name("update_mask").unwrap().into_owned();
        let paths = mask.as_message().unwrap().get_field_by_name("paths").unwrap().into_owned();
        paths
            .as_list()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_owned())
            .collect()
    }

    #[test]
    fn test_urlencoded_maps_fields_and_mask() {
        let fields = FormFields::from_urlencoded(b"name=ada+l&tags=a&tags=b&unknown=1&address=%7B%22city%22%3A%22Oslo%22%7D");
        let mut msg = profile();
        fields.apply(&mut msg).unwrap();

        assert_eq!(msg.get_field_by_name("name").unwrap().as_str(), Some("ada l"));
        assert_eq!(msg.get_field_by_name("tags").unwrap().as_list().unwrap().len(), 2);
        assert_eq!(mask_paths(&msg), vec!["name", "tags", "address"]);
    }

    #[test]
    fn test_json_name_preferred() {
        let fields = FormFields::from_urlencoded(b"updateMask=age");
        let mut msg = profile();
        fields.apply(&mut msg).unwrap();
        assert_eq!(mask_paths(&msg), vec!["age"]);
    }

    #[test]
    fn test_bad_value_fails() {
        let fields = FormFields::from_urlencoded(b"age=old");
        assert!(fields.apply(&mut profile()).is_err());
    }

    #[tokio::test]
    async fn test_multipart_text_and_first_file() {
        let boundary = "XBOUNDARY";
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"name\"\r\n\r\nada\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"avatar\"; filename=\"a.png\"\r\n\
             Content-Type: image/png\r\n\r\nFIRST\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"avatar\"; filename=\"b.png\"\r\n\
             Content-Type: image/png\r\n\r\nSECOND\r\n\
             --{b}--\r\n",
            b = boundary
        );
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_str(&format!("multipart/form-data; boundary={boundary}")).unwrap(),
        );

        let fields = FormFields::from_multipart(&headers, Bytes::from(body)).await.unwrap();
        assert_eq!(fields.get("avatar").unwrap(), [Bytes::from_static(b"FIRST")]);

        let mut msg = profile();
        fields.apply(&mut msg).unwrap();
        assert_eq!(msg.get_field_by_name("name").unwrap().as_str(), Some("ada"));
        assert_eq!(
            msg.get_field_by_name("avatar").unwrap().as_bytes().unwrap().as_ref(),
            b"FIRST"
        );
    }

    #[tokio::test]
    async fn test_multipart_without_boundary() {
        let err = FormFields::from_multipart(&HeaderMap::new(), Bytes::new()).await.unwrap_err();
        assert!(matches!(err, CodecError::Multipart(_)));
    }
}
