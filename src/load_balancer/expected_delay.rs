//! Expected-delay strategies (IPVS `sed` and `nq`).

use std::sync::Arc;

use crate::load_balancer::least_conn::pick_min_ratio;
use crate::load_balancer::{Endpoint, LoadBalancer};

/// Shortest expected delay: minimum `(active + 1) / weight`.
#[derive(Debug, Default)]
pub struct ShortestExpectedDelay;

impl ShortestExpectedDelay {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for ShortestExpectedDelay {
    fn next_server(&self, endpoints: &[Arc<Endpoint>], _key: Option<&str>) -> Option<Arc<Endpoint>> {
        pick_min_ratio(endpoints, |e| e.active() as u64 + 1)
    }
}

/// Never queue: an idle endpoint if one exists, otherwise shortest expected delay.
#[derive(Debug, Default)]
pub struct NeverQueue;

impl NeverQueue {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for NeverQueue {
    fn next_server(&self, endpoints: &[Arc<Endpoint>], key: Option<&str>) -> Option<Arc<Endpoint>> {
        endpoints
            .iter()
            .find(|e| e.active() == 0)
            .cloned()
            .or_else(|| ShortestExpectedDelay.next_server(endpoints, key))
    }
}
