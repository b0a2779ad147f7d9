//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Prometheus scrape endpoint
//! ```
//!
//! # Design Decisions
//! - Request ids come from the tower-http layers and ride on every span
//! - Metric calls are no-ops until a recorder is installed

pub mod logging;
pub mod metrics;
