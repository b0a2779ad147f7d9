//! Least Connections load balancing strategies.

use std::sync::Arc;

use crate::load_balancer::{Endpoint, LoadBalancer};

/// Least connections selector.
/// Selects the endpoint with the minimum number of active connections.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for LeastConnections {
    fn next_server(&self, endpoints: &[Arc<Endpoint>], _key: Option<&str>) -> Option<Arc<Endpoint>> {
        // In case of tie, the first one is selected (stability)
        endpoints.iter().min_by_key(|e| e.active()).cloned()
    }
}

/// Weighted least connections: minimum `active / weight`.
#[derive(Debug, Default)]
pub struct WeightedLeastConnections;

impl WeightedLeastConnections {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for WeightedLeastConnections {
    fn next_server(&self, endpoints: &[Arc<Endpoint>], _key: Option<&str>) -> Option<Arc<Endpoint>> {
        pick_min_ratio(endpoints, |e| e.active() as u64)
    }
}

/// Picks the endpoint minimising `cost(e) / weight(e)`, first one on ties.
///
/// Ratios are compared by cross-multiplying so no precision is lost.
pub(crate) fn pick_min_ratio(
    endpoints: &[Arc<Endpoint>],
    cost: impl Fn(&Endpoint) -> u64,
) -> Option<Arc<Endpoint>> {
    let mut best: Option<(&Arc<Endpoint>, u64)> = None;
    for endpoint in endpoints {
        let c = cost(endpoint);
        best = match best {
            Some((b, bc)) if bc * u64::from(endpoint.weight()) <= c * u64::from(b.weight()) => {
                Some((b, bc))
            }
            _ => Some((endpoint, c)),
        };
    }
    best.map(|(e, _)| e.clone())
}
