//! Dialers used by the pool.

use std::time::Duration;

use futures_util::future::BoxFuture;
use tonic::transport::{Channel, Endpoint};

use super::BoxError;

/// Opens connections to a backend address.
///
/// `Connection` clones must share the underlying transport.
pub trait Connector: Send + Sync + 'static {
    type Connection: Clone + Send + Sync + 'static;

    fn connect(&self, address: &str) -> BoxFuture<'static, Result<Self::Connection, BoxError>>;
}

/// Dials tonic channels over h2c.
#[derive(Debug, Clone)]
pub struct GrpcConnector {
    pub connect_timeout: Duration,
    /// Defer the TCP handshake to the first request.
    pub lazy: bool,
}

impl Default for GrpcConnector {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            lazy: false,
        }
    }
}

impl Connector for GrpcConnector {
    type Connection = Channel;

    fn connect(&self, address: &str) -> BoxFuture<'static, Result<Channel, BoxError>> {
        let endpoint = Endpoint::from_shared(with_scheme(address))
            .map(|e| e.connect_timeout(self.connect_timeout));
        let lazy = self.lazy;

        Box::pin(async move {
            let endpoint = endpoint?;
            if lazy {
                Ok(endpoint.connect_lazy())
            } else {
                Ok(endpoint.connect().await?)
            }
        })
    }
}

fn with_scheme(address: &str) -> String {
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_owned()
    } else {
        format!("http://{address}")
    }
}
