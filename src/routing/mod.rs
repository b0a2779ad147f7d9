//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Service registration
//!     → HttpBinding[] (descriptor::extract_bindings)
//!     → pattern.rs (templates compiled once per binding)
//!     → table.rs (swap in a new sorted route list)
//!
//! Incoming Request (verb, path)
//!     → table.rs (snapshot lookup, most specific pattern first)
//!     → Return: RouteMatch (Bound binding or NotFound) or no match
//! ```
//!
//! # Design Decisions
//! - Route lists are immutable snapshots, replaced whole on registration
//! - Deterministic: more literal segments win, then registration order
//! - Deregistration leaves an explicit NotFound route instead of a gap

pub mod pattern;
pub mod table;

pub use pattern::{PathPattern, PatternError};
pub use table::{Route, RouteMatch, RouteTable, RouteTarget};
