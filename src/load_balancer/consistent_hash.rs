//! Consistent-hash strategy.
//!
//! Every endpoint owns `VIRTUAL_NODES * weight` points on a SHA-256 ring. A key
//! maps to the first point at or after its hash, wrapping around.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::load_balancer::round_robin::RoundRobin;
use crate::load_balancer::{Endpoint, LoadBalancer};

const VIRTUAL_NODES: u32 = 160;

#[derive(Debug)]
pub struct ConsistentHash {
    /// (point, endpoint index), sorted by point.
    ring: Vec<(u64, usize)>,
    fallback: RoundRobin,
}

impl ConsistentHash {
    pub fn new(endpoints: &[Arc<Endpoint>]) -> Self {
        let mut ring = Vec::new();
        for (index, endpoint) in endpoints.iter().enumerate() {
            for vnode in 0..VIRTUAL_NODES * endpoint.weight() {
                let point = hash(format!("{}#{vnode}", endpoint.address()).as_bytes());
                ring.push((point, index));
            }
        }
        ring.sort_unstable();

        Self {
            ring,
            fallback: RoundRobin::new(),
        }
    }
}

fn hash(data: &[u8]) -> u64 {
    let digest = Sha256::digest(data);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

impl LoadBalancer for ConsistentHash {
    fn next_server(&self, endpoints: &[Arc<Endpoint>], key: Option<&str>) -> Option<Arc<Endpoint>> {
        let Some(key) = key.filter(|k| !k.is_empty()) else {
            return self.fallback.next_server(endpoints, None);
        };
        if self.ring.is_empty() {
            return None;
        }

        let h = hash(key.as_bytes());
        let slot = self.ring.partition_point(|(point, _)| *point < h);
        let (_, index) = self.ring[slot % self.ring.len()];
        endpoints.get(index).cloned()
    }
}
