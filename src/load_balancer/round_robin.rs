//! Round-robin load balancing strategies.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::load_balancer::{Endpoint, LoadBalancer};

/// Round-robin selector.
/// Stores an internal counter to rotate through endpoints.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn next_server(&self, endpoints: &[Arc<Endpoint>], _key: Option<&str>) -> Option<Arc<Endpoint>> {
        if endpoints.is_empty() {
            return None;
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % endpoints.len();
        Some(endpoints[index].clone())
    }
}

/// Smooth weighted round-robin.
///
/// Each pick adds every weight to its running score, selects the highest score
/// and subtracts the total weight from it. Picks are spread evenly instead of
/// in bursts.
#[derive(Debug)]
pub struct WeightedRoundRobin {
    current: Mutex<Vec<i64>>,
}

impl WeightedRoundRobin {
    pub fn new(len: usize) -> Self {
        Self {
            current: Mutex::new(vec![0; len]),
        }
    }
}

impl LoadBalancer for WeightedRoundRobin {
    fn next_server(&self, endpoints: &[Arc<Endpoint>], _key: Option<&str>) -> Option<Arc<Endpoint>> {
        if endpoints.is_empty() {
            return None;
        }

        let mut current = self.current.lock();
        current.resize(endpoints.len(), 0);

        let mut total = 0i64;
        let mut best = 0;
        for (i, endpoint) in endpoints.iter().enumerate() {
            let weight = i64::from(endpoint.weight());
            current[i] += weight;
            total += weight;
            if current[i] > current[best] {
                best = i;
            }
        }
        current[best] -= total;
        Some(endpoints[best].clone())
    }
}
