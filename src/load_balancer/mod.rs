//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! gRPC full method (+ client IP)
//!     → registry.rs (method key → Balancer)
//!     → Apply the entry's strategy:
//!         - round_robin.rs (rr, wrr)
//!         - least_conn.rs (lc, wlc)
//!         - expected_delay.rs (sed, nq)
//!         - consistent_hash.rs (ch)
//!     → endpoint.rs (acquire a pooled connection)
//! ```
//!
//! # Design Decisions
//! - A strategy is built for one fixed endpoint list and never sees another
//! - Connection counts come from the endpoint's pool, not a separate counter
//! - Replacing an entry never closes connections that are still checked out

pub mod consistent_hash;
pub mod endpoint;
pub mod expected_delay;
pub mod least_conn;
pub mod registry;
pub mod round_robin;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub use endpoint::Endpoint;
pub use registry::{Balancer, BalancerRegistry, LbError};

use consistent_hash::ConsistentHash;
use expected_delay::{NeverQueue, ShortestExpectedDelay};
use least_conn::{LeastConnections, WeightedLeastConnections};
use round_robin::{RoundRobin, WeightedRoundRobin};

/// Selects one endpoint per call.
///
/// `key` is the affinity key, the client IP for gRPC and HTTP calls.
pub trait LoadBalancer: Send + Sync + fmt::Debug {
    fn next_server(&self, endpoints: &[Arc<Endpoint>], key: Option<&str>) -> Option<Arc<Endpoint>>;
}

/// The seven balancing strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    #[default]
    RoundRobin,
    WeightedRoundRobin,
    LeastConnections,
    WeightedLeastConnections,
    ShortestExpectedDelay,
    NeverQueue,
    ConsistentHash,
}

impl Strategy {
    pub const ALL: [Strategy; 7] = [
        Strategy::RoundRobin,
        Strategy::WeightedRoundRobin,
        Strategy::LeastConnections,
        Strategy::WeightedLeastConnections,
        Strategy::ShortestExpectedDelay,
        Strategy::NeverQueue,
        Strategy::ConsistentHash,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::RoundRobin => "round_robin",
            Strategy::WeightedRoundRobin => "weighted_round_robin",
            Strategy::LeastConnections => "least_connections",
            Strategy::WeightedLeastConnections => "weighted_least_connections",
            Strategy::ShortestExpectedDelay => "shortest_expected_delay",
            Strategy::NeverQueue => "never_queue",
            Strategy::ConsistentHash => "consistent_hash",
        }
    }

    fn short_name(&self) -> &'static str {
        match self {
            Strategy::RoundRobin => "rr",
            Strategy::WeightedRoundRobin => "wrr",
            Strategy::LeastConnections => "lc",
            Strategy::WeightedLeastConnections => "wlc",
            Strategy::ShortestExpectedDelay => "sed",
            Strategy::NeverQueue => "nq",
            Strategy::ConsistentHash => "ch",
        }
    }

    /// Build a selector for the given endpoint list.
    pub fn build(&self, endpoints: &[Arc<Endpoint>]) -> Box<dyn LoadBalancer> {
        match self {
            Strategy::RoundRobin => Box::new(RoundRobin::new()),
            Strategy::WeightedRoundRobin => Box::new(WeightedRoundRobin::new(endpoints.len())),
            Strategy::LeastConnections => Box::new(LeastConnections::new()),
            Strategy::WeightedLeastConnections => Box::new(WeightedLeastConnections::new()),
            Strategy::ShortestExpectedDelay => Box::new(ShortestExpectedDelay::new()),
            Strategy::NeverQueue => Box::new(NeverQueue::new()),
            Strategy::ConsistentHash => Box::new(ConsistentHash::new(endpoints)),
        }
    }
}

impl FromStr for Strategy {
    type Err = LbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        if wanted.is_empty() {
            return Ok(Strategy::default());
        }
        Strategy::ALL
            .into_iter()
            .find(|st| st.as_str() == wanted || st.short_name() == wanted)
            .ok_or_else(|| LbError::UnknownStrategy(s.to_owned()))
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_names() {
        for strategy in Strategy::ALL {
            assert_eq!(strategy.as_str().parse::<Strategy>().unwrap(), strategy);
            assert_eq!(strategy.short_name().parse::<Strategy>().unwrap(), strategy);
        }
        assert_eq!("Least-Connections".parse::<Strategy>().unwrap(), Strategy::LeastConnections);
        assert_eq!("".parse::<Strategy>().unwrap(), Strategy::RoundRobin);
        assert!("random".parse::<Strategy>().is_err());
    }
}
