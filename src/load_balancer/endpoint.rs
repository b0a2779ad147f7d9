//! Backend endpoint abstraction.
//!
//! # Responsibilities
//! - Represent one backend address with a fixed weight
//! - Own the connection pool to that address
//! - Expose active/idle counts for the connection-aware strategies

use crate::pool::{Pool, PoolError, PoolStats, PooledConnection};

/// A single backend server.
#[derive(Debug)]
pub struct Endpoint {
    name: String,
    address: String,
    weight: u32,
    pool: Pool,
}

impl Endpoint {
    /// Create an endpoint. A zero weight is raised to 1.
    pub fn new(name: impl Into<String>, address: impl Into<String>, weight: u32, pool: Pool) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            weight: weight.max(1),
            pool,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// Number of connections currently checked out.
    pub fn active(&self) -> usize {
        self.pool.stats().active
    }

    pub fn idle(&self) -> usize {
        self.pool.stats().idle
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Check out a connection. The guard releases it on drop.
    pub async fn acquire(&self) -> Result<PooledConnection, PoolError> {
        self.pool.get().await
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        // Nothing can select this endpoint anymore; in-flight guards still drain.
        self.pool.close();
    }
}
