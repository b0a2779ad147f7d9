//! HTTP binding extraction.
//!
//! Turns the gateway schema of one service into a list of [`HttpBinding`]s,
//! resolving every type name against the loaded descriptor.

use http::Method;
use prost_reflect::{MessageDescriptor, MethodDescriptor};
use thiserror::Error;

use super::schema::{parse_schema, RuleSpec};
use super::{field_path, ServiceDescriptor};
use crate::routing::pattern::{PathPattern, PatternError};

/// Streaming shape of a bound method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamShape {
    Unary,
    ServerStream,
    ClientStream,
    BidiStream,
}

impl StreamShape {
    pub fn from_flags(client_stream: bool, server_stream: bool) -> Self {
        match (client_stream, server_stream) {
            (false, false) => StreamShape::Unary,
            (false, true) => StreamShape::ServerStream,
            (true, false) => StreamShape::ClientStream,
            (true, true) => StreamShape::BidiStream,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamShape::Unary => "unary",
            StreamShape::ServerStream => "server_stream",
            StreamShape::ClientStream => "client_stream",
            StreamShape::BidiStream => "bidi_stream",
        }
    }
}

/// One HTTP route bound to a gRPC method.
#[derive(Debug, Clone)]
pub struct HttpBinding {
    pub http_method: Method,
    pub pattern: PathPattern,
    pub path_params: Vec<String>,
    pub service: String,
    pub method: String,
    /// `/pkg.Service/Method`
    pub full_method: String,
    pub request: MessageDescriptor,
    pub response: MessageDescriptor,
    pub shape: StreamShape,
    /// Set when `response` was overridden by a wrapped-response type.
    pub wrapped_response: bool,
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("malformed gateway schema: {0}")]
    Json(#[from] serde_json::Error),

    #[error("schema key `{0}` is not of the form `service/method`")]
    InvalidKey(String),

    #[error("schema references unknown method `{0}`")]
    UnknownMethod(String),

    #[error("cannot resolve type `{type_name}` for `{method}`")]
    UnresolvedType { method: String, type_name: String },

    #[error("invalid HTTP verb `{verb}` for `{method}`")]
    InvalidVerb { method: String, verb: String },

    #[error("bad pattern for `{method}`: {source}")]
    Pattern {
        method: String,
        #[source]
        source: PatternError,
    },

    #[error("path param `{param}` of `{method}` is not a request field")]
    UnknownPathParam { method: String, param: String },
}

/// Derive every binding the schema declares. Fails as a whole on the first bad rule.
pub fn extract_bindings(
    descriptor: &ServiceDescriptor,
    schema: &[u8],
) -> Result<Vec<HttpBinding>, SchemaError> {
    let schema = parse_schema(schema)?;
    let mut bindings = Vec::new();

    for (key, rules) in &schema {
        let (service, method_name) = key
            .rsplit_once('/')
            .filter(|(s, m)| !s.is_empty() && !m.is_empty())
            .ok_or_else(|| SchemaError::InvalidKey(key.clone()))?;
        let method = descriptor
            .find_method(service, method_name)
            .ok_or_else(|| SchemaError::UnknownMethod(key.clone()))?;

        for rule in rules {
            bindings.push(bind_rule(descriptor, &method, rule)?);
        }
    }

    tracing::debug!(count = bindings.len(), "HTTP bindings extracted");
    Ok(bindings)
}

fn bind_rule(
    descriptor: &ServiceDescriptor,
    method: &MethodDescriptor,
    rule: &RuleSpec,
) -> Result<HttpBinding, SchemaError> {
    let full_method = format!("/{}/{}", method.parent_service().full_name(), method.name());
    let resolve = |pkg: &str, name: &str| {
        descriptor
            .resolve_type(pkg, name)
            .ok_or_else(|| SchemaError::UnresolvedType {
                method: full_method.clone(),
                type_name: name.to_owned(),
            })
    };

    let http_method = Method::from_bytes(rule.http_method.to_ascii_uppercase().as_bytes())
        .map_err(|_| SchemaError::InvalidVerb {
            method: full_method.clone(),
            verb: rule.http_method.clone(),
        })?;
    let pattern = PathPattern::parse(&rule.http_uri).map_err(|source| SchemaError::Pattern {
        method: full_method.clone(),
        source,
    })?;

    let request = resolve(&rule.in_pkg, &rule.in_name)?;
    let wrapped = rule
        .http_response
        .clone()
        .or_else(|| wrapped_response_option(method));
    let response = match &wrapped {
        Some(name) => resolve(&rule.out_pkg, name)?,
        None => resolve(&rule.out_pkg, &rule.out_name)?,
    };

    let mut path_params = rule.path_params().to_vec();
    if path_params.is_empty() {
        path_params = pattern.field_names().map(str::to_owned).collect();
    }
    for param in &path_params {
        if field_path(&request, param).is_none() {
            return Err(SchemaError::UnknownPathParam {
                method: full_method,
                param: param.clone(),
            });
        }
    }

    Ok(HttpBinding {
        http_method,
        pattern,
        path_params,
        service: method.parent_service().full_name().to_owned(),
        method: method.name().to_owned(),
        full_method,
        request,
        response,
        shape: StreamShape::from_flags(rule.is_client_stream, rule.is_server_stream),
        wrapped_response: wrapped.is_some(),
    })
}

/// A string-valued method option extension named `*http_response`, if any.
fn wrapped_response_option(method: &MethodDescriptor) -> Option<String> {
    let options = method.options();
    let name = options
        .extensions()
        .find(|(ext, _)| ext.name().ends_with("http_response"))
        .and_then(|(_, value)| value.as_str().map(str::to_owned))
        .filter(|name| !name.is_empty());
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::fixtures;
    use serde_json::json;

    fn greeter() -> ServiceDescriptor {
        ServiceDescriptor::load(fixtures::encode(&fixtures::greeter_set())).unwrap()
    }

    fn rule(method: &str, uri: &str) -> serde_json::Value {
        json!({
            "HttpMethod": method, "HttpUri": uri,
            "InName": "HelloRequest", "InPkg": "demo",
            "OutName": "HelloReply", "OutPkg": "demo"
        })
    }

    #[test]
    fn test_extract_greeter_bindings() {
        let bindings = extract_bindings(&greeter(), &fixtures::greeter_schema()).unwrap();
        assert_eq!(bindings.len(), 5);

        let get = bindings
            .iter()
            .find(|b| b.http_method == Method::GET && b.method == "SayHello")
            .unwrap();
        assert_eq!(get.full_method, "/demo.Greeter/SayHello");
        assert_eq!(get.path_params, vec!["name"]);
        assert_eq!(get.request.full_name(), "demo.HelloRequest");
        assert_eq!(get.response.full_name(), "demo.HelloReply");
        assert_eq!(get.shape, StreamShape::Unary);

        let shapes: Vec<_> = bindings.iter().map(|b| (b.method.as_str(), b.shape)).collect();
        assert!(shapes.contains(&("Countdown", StreamShape::ServerStream)));
        assert!(shapes.contains(&("Collect", StreamShape::ClientStream)));
        assert!(shapes.contains(&("Chat", StreamShape::BidiStream)));
    }

    #[test]
    fn test_short_service_name_and_lowercase_verb() {
        let schema = json!({ "Greeter/SayHello": [rule("post", "/v1/hi")] }).to_string();
        let bindings = extract_bindings(&greeter(), schema.as_bytes()).unwrap();
        assert_eq!(bindings[0].http_method, Method::POST);
        assert_eq!(bindings[0].service, "demo.Greeter");
    }

    #[test]
    fn test_path_params_default_to_pattern_fields() {
        let schema = json!({ "demo.Greeter/SayHello": [rule("GET", "/v1/hi/{name}")] }).to_string();
        let bindings = extract_bindings(&greeter(), schema.as_bytes()).unwrap();
        assert_eq!(bindings[0].path_params, vec!["name"]);
    }

    #[test]
    fn test_wrapped_response_override() {
        let desc = ServiceDescriptor::load(fixtures::encode(&fixtures::profile_set())).unwrap();
        let schema = json!({
            "demo.Profiles/Save": [{
                "HttpMethod": "POST", "HttpUri": "/v1/profiles",
                "InName": "Profile", "InPkg": "demo",
                "OutName": "Profile", "OutPkg": "demo",
                "http_response": "google.api.HttpBody"
            }]
        })
        .to_string();

        let bindings = extract_bindings(&desc, schema.as_bytes()).unwrap();
        assert!(bindings[0].wrapped_response);
        assert_eq!(bindings[0].response.full_name(), "google.api.HttpBody");
    }

    #[test]
    fn test_failures_are_all_or_nothing() {
        let desc = greeter();
        let cases = [
            (
                json!({ "demo.Greeter/SayHello": [rule("POST", "/ok"), { "HttpMethod": "POST", "HttpUri": "/bad",
                    "InName": "Nope", "InPkg": "demo", "OutName": "HelloReply", "OutPkg": "demo" }] }),
                "UnresolvedType",
            ),
            (json!({ "demo.Greeter/Missing": [rule("POST", "/x")] }), "UnknownMethod"),
            (json!({ "no-slash": [rule("POST", "/x")] }), "InvalidKey"),
            (json!({ "demo.Greeter/SayHello": [rule("BAD VERB", "/x")] }), "InvalidVerb"),
            (json!({ "demo.Greeter/SayHello": [rule("GET", "x/{name")] }), "Pattern"),
            (json!({ "demo.Greeter/SayHello": [rule("GET", "/x/{missing}")] }), "UnknownPathParam"),
        ];

        for (schema, expected) in cases {
            let err = extract_bindings(&desc, schema.to_string().as_bytes()).unwrap_err();
            assert!(
                format!("{err:?}").starts_with(expected),
                "expected {expected}, got {err:?}"
            );
        }
    }
}
