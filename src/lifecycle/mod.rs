//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → init logging/metrics → register services → bind listeners
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Shutdown::trigger → listeners stop accepting
//!     → in-flight requests drain → background loops exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger graceful shutdown
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
