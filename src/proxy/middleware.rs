//! Hooks run before a passthrough call touches any backend.

use std::net::{IpAddr, SocketAddr};

use futures_util::future::BoxFuture;
use tonic::metadata::{MetadataMap, MetadataValue};
use tonic::Status;

use crate::interceptor::CallInfo;

pub const FORWARDED_FOR: &str = "x-forwarded-for";

/// A pre-proxy check, such as authentication against the raw call metadata.
///
/// Returning an error aborts the call with that status before an endpoint is
/// selected.
pub trait ProxyMiddleware: Send + Sync {
    fn before_proxy<'a>(
        &'a self,
        info: &'a CallInfo,
        metadata: &'a mut MetadataMap,
    ) -> BoxFuture<'a, Result<(), Status>>;
}

/// The originating client: the first `x-forwarded-for` entry, else the peer.
pub fn client_ip(metadata: &MetadataMap, peer: Option<SocketAddr>) -> Option<IpAddr> {
    let forwarded = metadata
        .get(FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok());
    forwarded.or_else(|| peer.map(|addr| addr.ip()))
}

/// Append `hop` to the forwarded-for chain, seeding it with `client` when absent.
pub fn append_forwarded_for(metadata: &mut MetadataMap, client: Option<IpAddr>, hop: Option<IpAddr>) {
    let existing = metadata
        .get(FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let mut chain = match existing {
        Some(chain) if !chain.trim().is_empty() => chain,
        _ => client.map(|ip| ip.to_string()).unwrap_or_default(),
    };
    if let Some(hop) = hop {
        if !chain.is_empty() {
            chain.push_str(", ");
        }
        chain.push_str(&hop.to_string());
    }
    if chain.is_empty() {
        return;
    }
    if let Ok(value) = MetadataValue::try_from(chain.as_str()) {
        metadata.insert(FORWARDED_FOR, value);
    }
}
