//! Schema-driven RPC gateway.
//!
//! Turns registered protobuf descriptors plus an HTTP binding schema into a
//! live REST/SSE/WebSocket front for gRPC backends, and forwards native gRPC
//! traffic byte-for-byte.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌────────────────────────────────────────────────────────┐
//!                    │                       GATEWAY                          │
//!                    │                                                        │
//!   HTTP / SSE / WS  │  ┌──────────┐   ┌─────────┐   ┌──────────────┐         │
//!   ─────────────────┼─▶│   http   │──▶│ routing │──▶│ interceptor  │         │
//!                    │  │ dispatch │   │  table  │   │    chain     │         │
//!                    │  └────┬─────┘   └─────────┘   └──────┬───────┘         │
//!                    │       │ codec (json/form/sse)        │                 │
//!                    │       │                              ▼                 │
//!   native gRPC      │  ┌────▼─────┐              ┌──────────────────┐        │
//!   ─────────────────┼─▶│  proxy   │─────────────▶│ load_balancer    │────────┼──▶ Backends
//!                    │  │passthru  │              │   + pool         │        │
//!                    │  └──────────┘              └──────────────────┘        │
//!                    │                                                        │
//!                    │  ┌──────────────────────────────────────────────────┐  │
//!                    │  │ descriptor registry · config · observability ·   │  │
//!                    │  │ lifecycle · gateway (register / update / delete) │  │
//!                    │  └──────────────────────────────────────────────────┘  │
//!                    └────────────────────────────────────────────────────────┘
//! ```

// Core subsystems
pub mod codec;
pub mod descriptor;
pub mod gateway;
pub mod http;
pub mod proxy;
pub mod routing;

// Traffic management
pub mod interceptor;
pub mod load_balancer;
pub mod pool;

// Cross-cutting concerns
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod observability;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use gateway::{EndpointSpec, Gateway, ServiceId, ServiceSpec};
pub use lifecycle::Shutdown;
