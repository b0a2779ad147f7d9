//! Backend connection pooling.
//!
//! # Responsibilities
//! - Bound the number of connections open to one backend address
//! - Reuse idle connections, most recently returned first
//! - Evict connections past their idle time or lifetime
//! - Release every connection through an RAII guard
//!
//! # Data Flow
//! ```text
//! Balancer picks Endpoint
//!     → Pool::get (semaphore slot, bounded by wait_timeout)
//!     → idle connection or Connector::connect
//!     → PooledConnection (held for the whole call)
//!     → Drop returns it to the idle set or discards it
//! ```

pub mod bounded;
pub mod connector;

use std::time::Duration;

use thiserror::Error;

pub use bounded::{Pool, PooledConnection};
pub use connector::{Connector, GrpcConnector};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Limits applied to one pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: usize,
    pub max_idle: Duration,
    pub max_lifetime: Duration,
    pub wait_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 16,
            max_idle: Duration::from_secs(90),
            max_lifetime: Duration::from_secs(30 * 60),
            wait_timeout: Duration::from_secs(5),
        }
    }
}

/// Real-time counts. `active + idle == open <= max_connections`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub active: usize,
    pub idle: usize,
    pub open: usize,
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no connection to {address} became available within {waited:?}")]
    Exhausted { address: String, waited: Duration },

    #[error("pool for {address} is closed")]
    Closed { address: String },

    #[error("failed to connect to {address}: {source}")]
    Dial {
        address: String,
        #[source]
        source: BoxError,
    },
}

impl PoolError {
    pub fn to_status(&self) -> tonic::Status {
        tonic::Status::unavailable(self.to_string())
    }
}
