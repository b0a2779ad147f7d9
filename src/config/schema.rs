//! Configuration schema definitions.
//!
//! Every section carries `#[serde(default)]`, so a file only needs the values
//! it changes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::http::DispatchSettings;
use crate::pool::{GrpcConnector, PoolConfig};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener addresses and request limits.
    pub listener: ListenerConfig,

    /// Per-endpoint connection pool limits.
    pub pool: PoolSettings,

    pub timeouts: TimeoutConfig,

    pub streaming: StreamingConfig,

    pub observability: ObservabilityConfig,

    /// Services registered at startup and reconciled on reload.
    pub services: Vec<ServiceConfig>,
}

impl GatewayConfig {
    /// Limits handed to the HTTP dispatch engine.
    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            max_body_size: self.listener.max_body_size,
            request_timeout: Duration::from_secs(self.timeouts.request_secs),
            sse_retry: (self.streaming.sse_retry_ms > 0)
                .then(|| Duration::from_millis(self.streaming.sse_retry_ms)),
            stream_buffer: self.streaming.channel_capacity,
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// HTTP listener (REST, SSE, WebSocket, and gRPC by content type).
    pub http_address: String,

    /// Internal gRPC listener.
    pub grpc_address: String,

    /// Largest accepted request body in bytes.
    pub max_body_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            http_address: "0.0.0.0:8080".to_string(),
            grpc_address: "0.0.0.0:9090".to_string(),
            max_body_size: 4 * 1024 * 1024,
        }
    }
}

/// Connection pool settings, applied to every endpoint.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PoolSettings {
    pub max_connections: usize,
    pub max_idle_secs: u64,
    pub max_lifetime_secs: u64,
    pub connect_timeout_secs: u64,
    /// How long `get` waits for a free slot.
    pub wait_timeout_secs: u64,
    /// Dial on first use instead of at checkout.
    pub lazy_connect: bool,
    /// Interval of the background idle reaper.
    pub reap_interval_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 16,
            max_idle_secs: 90,
            max_lifetime_secs: 30 * 60,
            connect_timeout_secs: 3,
            wait_timeout_secs: 5,
            lazy_connect: false,
            reap_interval_secs: 30,
        }
    }
}

impl PoolSettings {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_connections: self.max_connections,
            max_idle: Duration::from_secs(self.max_idle_secs),
            max_lifetime: Duration::from_secs(self.max_lifetime_secs),
            wait_timeout: Duration::from_secs(self.wait_timeout_secs),
        }
    }

    pub fn connector(&self) -> GrpcConnector {
        GrpcConnector {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            lazy: self.lazy_connect,
        }
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs.max(1))
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Deadline for unary calls.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Streaming delivery settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct StreamingConfig {
    /// SSE `retry:` hint. Zero omits the field.
    pub sse_retry_ms: u64,

    /// Buffer between a WebSocket reader and the upstream call.
    pub channel_capacity: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            sse_retry_ms: 3000,
            channel_capacity: 32,
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub log_level: String,

    pub log_format: LogFormat,

    pub metrics_enabled: bool,

    /// Prometheus scrape address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "rpc_gateway=info,tower_http=info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9100".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// A service registered from the config file.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ServiceConfig {
    /// Unique name; reloads match services by it.
    pub name: String,

    /// Path to a serialized `FileDescriptorSet`.
    pub descriptor: String,

    /// Path to the gateway schema JSON.
    pub schema: String,

    /// Balancing strategy name, round robin when empty.
    #[serde(default)]
    pub strategy: String,

    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

/// Backend address with its balancing weight.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct EndpointConfig {
    /// Backend address (e.g., "127.0.0.1:50051").
    pub address: String,

    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}
