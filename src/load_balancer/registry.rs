//! Method-key to balancer mapping.
//!
//! # Responsibilities
//! - Bind a strategy to an ordered endpoint list (`Balancer`)
//! - Install one entry under every method key a descriptor owns
//! - Serve lock-free reads while registration swaps the table

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use thiserror::Error;

use crate::descriptor::ServiceDescriptor;
use crate::load_balancer::{Endpoint, LoadBalancer, Strategy};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LbError {
    #[error("no endpoint available for `{0}`")]
    NoEndpoint(String),

    #[error("unknown load balancing strategy `{0}`")]
    UnknownStrategy(String),
}

/// One strategy instance bound to an ordered set of endpoints.
#[derive(Debug)]
pub struct Balancer {
    strategy: Strategy,
    endpoints: Vec<Arc<Endpoint>>,
    selector: Box<dyn LoadBalancer>,
}

impl Balancer {
    pub fn new(strategy: Strategy, endpoints: Vec<Arc<Endpoint>>) -> Self {
        let selector = strategy.build(&endpoints);
        Self {
            strategy,
            endpoints,
            selector,
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn endpoints(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }

    pub fn select(&self, key: Option<&str>) -> Option<Arc<Endpoint>> {
        self.selector.next_server(&self.endpoints, key)
    }
}

/// Read-mostly map from `/pkg.Service/Method` to the active balancer.
///
/// Writers are expected to be serialised by the caller.
#[derive(Debug, Default)]
pub struct BalancerRegistry {
    entries: ArcSwap<HashMap<String, Arc<Balancer>>>,
}

impl BalancerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `entry` under every method key of `descriptor`, replacing prior entries.
    pub fn register(&self, entry: Arc<Balancer>, descriptor: &ServiceDescriptor) {
        let keys = descriptor.method_keys();
        self.entries.rcu(|current| {
            let mut next = HashMap::clone(current);
            for key in &keys {
                next.insert(key.clone(), entry.clone());
            }
            next
        });
        tracing::debug!(methods = keys.len(), strategy = %entry.strategy(), "Balancer registered");
    }

    /// Drop the keys `old` still holds for `prior` and install `entry` under
    /// the keys of `new`, in one swap.
    pub fn replace(
        &self,
        prior: &Arc<Balancer>,
        old: &ServiceDescriptor,
        entry: Arc<Balancer>,
        new: &ServiceDescriptor,
    ) {
        let stale = old.method_keys();
        let fresh = new.method_keys();
        self.entries.rcu(|current| {
            let mut next = HashMap::clone(current);
            remove_owned(&mut next, &stale, prior);
            for key in &fresh {
                next.insert(key.clone(), entry.clone());
            }
            next
        });
    }

    /// Remove the keys of `descriptor` that still point at `entry`. A key a
    /// later registration took over is left alone. Endpoint connections are
    /// left to drain.
    pub fn delete(&self, entry: &Arc<Balancer>, descriptor: &ServiceDescriptor) {
        let keys = descriptor.method_keys();
        self.entries.rcu(|current| {
            let mut next = HashMap::clone(current);
            remove_owned(&mut next, &keys, entry);
            next
        });
    }

    pub fn get(&self, method: &str) -> Option<Arc<Balancer>> {
        self.entries.load().get(method).cloned()
    }

    pub fn select(&self, method: &str, key: Option<&str>) -> Result<Arc<Endpoint>, LbError> {
        self.get(method)
            .and_then(|b| b.select(key))
            .ok_or_else(|| LbError::NoEndpoint(method.to_owned()))
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn remove_owned(map: &mut HashMap<String, Arc<Balancer>>, keys: &[String], owner: &Arc<Balancer>) {
    for key in keys {
        if map.get(key).is_some_and(|current| Arc::ptr_eq(current, owner)) {
            map.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::fixtures;
    use crate::load_balancer::testing::endpoints;

    fn greeter() -> ServiceDescriptor {
        ServiceDescriptor::load(fixtures::encode(&fixtures::greeter_set())).unwrap()
    }

    #[tokio::test]
    async fn test_register_covers_every_method() {
        let registry = BalancerRegistry::new();
        let desc = greeter();
        registry.register(
            Arc::new(Balancer::new(Strategy::RoundRobin, endpoints(&[1]))),
            &desc,
        );

        assert_eq!(registry.len(), 4);
        for key in desc.method_keys() {
            assert_eq!(registry.select(&key, None).unwrap().name(), "ep0");
        }
    }

    #[tokio::test]
    async fn test_reregister_replaces_entry() {
        let registry = BalancerRegistry::new();
        let desc = greeter();
        let first = endpoints(&[1]);
        registry.register(Arc::new(Balancer::new(Strategy::RoundRobin, first.clone())), &desc);
        registry.register(
            Arc::new(Balancer::new(Strategy::LeastConnections, endpoints(&[1, 1]))),
            &desc,
        );

        let entry = registry.get("/demo.Greeter/SayHello").unwrap();
        assert_eq!(entry.strategy(), Strategy::LeastConnections);
        assert_eq!(entry.endpoints().len(), 2);
        // The replaced entry's endpoints stay usable by whoever still holds them.
        assert!(!first[0].pool().is_closed());
    }

    #[tokio::test]
    async fn test_delete_and_unknown_keys() {
        let registry = BalancerRegistry::new();
        let desc = greeter();
        let entry = Arc::new(Balancer::new(Strategy::RoundRobin, endpoints(&[1])));
        registry.register(entry.clone(), &desc);
        registry.delete(&entry, &desc);

        assert!(registry.is_empty());
        assert_eq!(
            registry.select("/demo.Greeter/SayHello", None).unwrap_err(),
            LbError::NoEndpoint("/demo.Greeter/SayHello".into())
        );
    }

    #[test]
    fn test_empty_endpoint_set_is_no_endpoint() {
        let registry = BalancerRegistry::new();
        let desc = greeter();
        for strategy in Strategy::ALL {
            registry.register(Arc::new(Balancer::new(strategy, Vec::new())), &desc);
            assert!(matches!(
                registry.select("/demo.Greeter/Chat", Some("10.0.0.1")),
                Err(LbError::NoEndpoint(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_replace_swaps_keys() {
        let registry = BalancerRegistry::new();
        let greeter = greeter();
        let profiles = ServiceDescriptor::load(fixtures::encode(&fixtures::profile_set())).unwrap();
        let first = Arc::new(Balancer::new(Strategy::RoundRobin, endpoints(&[1])));
        registry.register(first.clone(), &greeter);

        registry.replace(
            &first,
            &greeter,
            Arc::new(Balancer::new(Strategy::RoundRobin, endpoints(&[1]))),
            &profiles,
        );
        assert!(registry.get("/demo.Greeter/SayHello").is_none());
        assert!(registry.get("/demo.Profiles/Save").is_some());
    }

    #[tokio::test]
    async fn test_delete_spares_keys_taken_over() {
        let registry = BalancerRegistry::new();
        let desc = greeter();
        let older = Arc::new(Balancer::new(Strategy::RoundRobin, endpoints(&[1])));
        let newer = Arc::new(Balancer::new(Strategy::LeastConnections, endpoints(&[1, 1])));
        registry.register(older.clone(), &desc);
        registry.register(newer.clone(), &desc);

        registry.delete(&older, &desc);
        assert_eq!(registry.len(), 4);
        let entry = registry.get("/demo.Greeter/SayHello").unwrap();
        assert!(Arc::ptr_eq(&entry, &newer));

        registry.delete(&newer, &desc);
        assert!(registry.is_empty());
    }
}
