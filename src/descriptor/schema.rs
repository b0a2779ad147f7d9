//! Gateway schema file format.
//!
//! A JSON object keyed by `"{service}/{method}"`, each value a list of HTTP
//! rules for that method. The service may be short or fully qualified.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One HTTP rule for a method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    #[serde(rename = "HttpMethod")]
    pub http_method: String,

    #[serde(rename = "HttpUri")]
    pub http_uri: String,

    #[serde(rename = "PathParams", default)]
    pub path_params: Option<Vec<String>>,

    #[serde(rename = "InName")]
    pub in_name: String,

    #[serde(rename = "InPkg", default)]
    pub in_pkg: String,

    #[serde(rename = "OutName")]
    pub out_name: String,

    #[serde(rename = "OutPkg", default)]
    pub out_pkg: String,

    #[serde(rename = "IsClientStream", default)]
    pub is_client_stream: bool,

    #[serde(rename = "IsServerStream", default)]
    pub is_server_stream: bool,

    /// Message type to answer with instead of `OutName`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_response: Option<String>,
}

impl RuleSpec {
    pub fn path_params(&self) -> &[String] {
        self.path_params.as_deref().unwrap_or_default()
    }
}

pub type GatewaySchema = BTreeMap<String, Vec<RuleSpec>>;

pub fn parse_schema(raw: &[u8]) -> Result<GatewaySchema, serde_json::Error> {
    serde_json::from_slice(raw)
}
