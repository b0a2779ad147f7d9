//! HTTP dispatch engine.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (axum router, request id, trace, limits)
//!     → dispatch.rs (route match, shape selection)
//!     → request.rs (metadata, decode, param overlay)
//!     → upstream.rs (pooled typed call behind the interceptor chain)
//!     → response.rs / websocket.rs (encode, headers, status)
//!     → client
//! ```

pub mod dispatch;
pub mod request;
pub mod response;
pub mod server;
pub mod upstream;
pub mod websocket;

pub use request::X_REQUEST_ID;
pub use server::{router, AppState, DispatchSettings};
