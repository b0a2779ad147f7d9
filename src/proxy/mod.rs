//! Generic gRPC passthrough.
//!
//! # Responsibilities
//! - Accept any method on the internal gRPC listener without generated code
//! - Pick a backend through the balancer registry and hold a pooled connection
//! - Pump frames in both directions with gRPC half-close and trailer semantics
//!
//! # Design Decisions
//! - Messages stay opaque `Bytes` (`RawCodec`); the proxy never decodes them
//! - One spawned task per call carries client→backend traffic; the response
//!   stream itself carries backend→client traffic, so dropping it tears down both

pub mod codec;
pub mod middleware;
pub mod passthrough;
pub mod server;

pub use codec::RawCodec;
pub use middleware::ProxyMiddleware;
pub use passthrough::PassthroughProxy;
pub use server::{is_grpc_request, router};
