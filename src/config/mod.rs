//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! gateway.toml
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!
//! On change:
//!     watcher.rs detects the write
//!     → loader.rs loads and validates the new file
//!     → mpsc → Gateway::reconcile(services)
//! ```
//!
//! # Design Decisions
//! - Listener, pool and observability settings apply at startup only;
//!   reloads reconcile the `[[services]]` list
//! - A file that fails validation is logged and ignored

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    EndpointConfig, GatewayConfig, ListenerConfig, LogFormat, ObservabilityConfig, PoolSettings,
    ServiceConfig,
};
pub use validation::ValidationError;
pub use watcher::ConfigWatcher;
