//! Bounded connection pool and its RAII guard.

use std::collections::VecDeque;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::{Connector, GrpcConnector, PoolConfig, PoolError, PoolStats};

struct IdleConnection<T> {
    conn: T,
    created_at: Instant,
    idle_since: Instant,
}

struct Shared<C: Connector> {
    address: String,
    connector: C,
    config: PoolConfig,
    slots: Arc<Semaphore>,
    idle: Mutex<VecDeque<IdleConnection<C::Connection>>>,
    active: AtomicUsize,
    open: AtomicUsize,
}

impl<C: Connector> Shared<C> {
    fn expired(&self, created_at: Instant, idle_since: Instant) -> bool {
        created_at.elapsed() >= self.config.max_lifetime
            || idle_since.elapsed() >= self.config.max_idle
    }

    /// Pops the most recently returned connection that is still usable.
    fn take_idle(&self) -> Option<IdleConnection<C::Connection>> {
        let mut idle = self.idle.lock();
        while let Some(candidate) = idle.pop_back() {
            if self.expired(candidate.created_at, candidate.idle_since) {
                self.open.fetch_sub(1, Ordering::AcqRel);
                continue;
            }
            return Some(candidate);
        }
        None
    }

    fn release(&self, conn: C::Connection, created_at: Instant, broken: bool) {
        self.active.fetch_sub(1, Ordering::AcqRel);

        let discard = broken
            || self.slots.is_closed()
            || created_at.elapsed() >= self.config.max_lifetime;
        if discard {
            self.open.fetch_sub(1, Ordering::AcqRel);
            tracing::trace!(address = %self.address, broken, "Connection discarded");
            return;
        }

        self.idle.lock().push_back(IdleConnection {
            conn,
            created_at,
            idle_since: Instant::now(),
        });
    }
}

/// A bounded pool of connections to one backend address.
pub struct Pool<C: Connector = GrpcConnector> {
    shared: Arc<Shared<C>>,
}

impl<C: Connector> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<C: Connector> Pool<C> {
    pub fn new(address: impl Into<String>, connector: C, config: PoolConfig) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_connections));
        Self {
            shared: Arc::new(Shared {
                address: address.into(),
                connector,
                config,
                slots,
                idle: Mutex::new(VecDeque::new()),
                active: AtomicUsize::new(0),
                open: AtomicUsize::new(0),
            }),
        }
    }

    pub fn address(&self) -> &str {
        &self.shared.address
    }

    /// Check out a connection, waiting at most `wait_timeout` for a free slot.
    pub async fn get(&self) -> Result<PooledConnection<C>, PoolError> {
        let shared = &self.shared;
        let waited = shared.config.wait_timeout;

        let permit = match tokio::time::timeout(waited, shared.slots.clone().acquire_owned()).await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(PoolError::Closed {
                    address: shared.address.clone(),
                })
            }
            Err(_) => {
                return Err(PoolError::Exhausted {
                    address: shared.address.clone(),
                    waited,
                })
            }
        };

        if let Some(idle) = shared.take_idle() {
            shared.active.fetch_add(1, Ordering::AcqRel);
            return Ok(PooledConnection {
                conn: idle.conn,
                created_at: idle.created_at,
                broken: false,
                pool: shared.clone(),
                _permit: permit,
            });
        }

        let conn = shared
            .connector
            .connect(&shared.address)
            .await
            .map_err(|source| PoolError::Dial {
                address: shared.address.clone(),
                source,
            })?;

        shared.open.fetch_add(1, Ordering::AcqRel);
        shared.active.fetch_add(1, Ordering::AcqRel);
        tracing::debug!(address = %shared.address, "Opened backend connection");

        Ok(PooledConnection {
            conn,
            created_at: Instant::now(),
            broken: false,
            pool: shared.clone(),
            _permit: permit,
        })
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            active: self.shared.active.load(Ordering::Acquire),
            idle: self.shared.idle.lock().len(),
            open: self.shared.open.load(Ordering::Acquire),
        }
    }

    /// Drop idle connections past `max_idle` or `max_lifetime`. Returns how many went.
    pub fn evict_expired(&self) -> usize {
        let shared = &self.shared;
        let mut idle = shared.idle.lock();
        let before = idle.len();
        idle.retain(|c| !shared.expired(c.created_at, c.idle_since));
        let evicted = before - idle.len();
        shared.open.fetch_sub(evicted, Ordering::AcqRel);
        evicted
    }

    /// Refuse new checkouts and drop idle connections. Checked-out ones close on release.
    pub fn close(&self) {
        self.shared.slots.close();
        let drained = {
            let mut idle = self.shared.idle.lock();
            let n = idle.len();
            idle.clear();
            n
        };
        self.shared.open.fetch_sub(drained, Ordering::AcqRel);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.slots.is_closed()
    }
}

impl<C: Connector> fmt::Debug for Pool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("address", &self.shared.address)
            .field("stats", &self.stats())
            .finish()
    }
}

/// A checked-out connection. Dropping it returns the connection to its pool.
pub struct PooledConnection<C: Connector = GrpcConnector> {
    conn: C::Connection,
    created_at: Instant,
    broken: bool,
    pool: Arc<Shared<C>>,
    _permit: OwnedSemaphorePermit,
}

impl<C: Connector> PooledConnection<C> {
    /// Discard the connection on release instead of reusing it.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    pub fn address(&self) -> &str {
        &self.pool.address
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }
}

impl<C: Connector> Deref for PooledConnection<C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        // The permit field drops after this, so the slot frees last.
        self.pool
            .release(self.conn.clone(), self.created_at, self.broken);
    }
}

impl<C: Connector> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("address", &self.pool.address)
            .field("broken", &self.broken)
            .finish()
    }
}
