//! HTTP route table.
//!
//! # Responsibilities
//! - Map (verb, pattern) to a binding or an explicit NotFound responder
//! - Order overlapping patterns, most specific first
//! - Swap the whole table atomically on every change
//!
//! # Design Decisions
//! - Deleted routes stay in the table as `NotFound`, so deregistration is observable
//! - Readers load a snapshot and never wait for writers

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use http::Method;

use crate::descriptor::HttpBinding;
use crate::gateway::ServiceId;
use crate::routing::pattern::PathPattern;

/// What a matched route does.
#[derive(Debug, Clone)]
pub enum RouteTarget {
    Bound(Arc<HttpBinding>),
    /// Left behind by a deleted service.
    NotFound,
}

#[derive(Debug)]
pub struct Route {
    pub service: ServiceId,
    pub method: Method,
    pub pattern: PathPattern,
    pub target: RouteTarget,
    specificity: usize,
    seq: u64,
}

impl Route {
    fn same_key(&self, other: &Route) -> bool {
        self.method == other.method && self.pattern.template() == other.pattern.template()
    }
}

/// A successful lookup.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<Route>,
    pub params: Vec<(String, String)>,
}

#[derive(Debug, Default)]
pub struct RouteTable {
    routes: ArcSwap<Vec<Arc<Route>>>,
    seq: AtomicU64,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install one route per binding. An existing route with the same verb and
    /// pattern is replaced, whichever service owned it.
    pub fn register(&self, service: ServiceId, bindings: &[HttpBinding]) {
        let fresh = self.build_routes(service, bindings);
        self.routes.rcu(|current| merge(current.iter().cloned(), &fresh));
        tracing::debug!(%service, routes = fresh.len(), "Routes registered");
    }

    /// Turn a service's routes into NotFound responders, then install its new bindings.
    pub fn replace(&self, service: ServiceId, bindings: &[HttpBinding]) {
        let fresh = self.build_routes(service, bindings);
        self.routes.rcu(|current| {
            let tombstoned = current.iter().map(|r| tombstone(r, service));
            merge(tombstoned, &fresh)
        });
    }

    /// Replace every route of `service` with a NotFound responder.
    pub fn delete(&self, service: ServiceId) {
        self.routes.rcu(|current| {
            current
                .iter()
                .map(|r| tombstone(r, service))
                .collect::<Vec<_>>()
        });
        tracing::debug!(%service, "Routes replaced with NotFound");
    }

    /// Find the most specific route for a request.
    pub fn find(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        let routes = self.routes.load();
        routes.iter().find_map(|route| {
            if route.method != *method {
                return None;
            }
            route.pattern.matches(path).map(|params| RouteMatch {
                route: route.clone(),
                params,
            })
        })
    }

    pub fn len(&self) -> usize {
        self.routes.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn build_routes(&self, service: ServiceId, bindings: &[HttpBinding]) -> Vec<Arc<Route>> {
        bindings
            .iter()
            .map(|binding| {
                Arc::new(Route {
                    service,
                    method: binding.http_method.clone(),
                    pattern: binding.pattern.clone(),
                    specificity: binding.pattern.literal_count(),
                    seq: self.seq.fetch_add(1, Ordering::Relaxed),
                    target: RouteTarget::Bound(Arc::new(binding.clone())),
                })
            })
            .collect()
    }
}

fn tombstone(route: &Arc<Route>, service: ServiceId) -> Arc<Route> {
    match route.target {
        RouteTarget::Bound(_) if route.service == service => Arc::new(Route {
            service: route.service,
            method: route.method.clone(),
            pattern: route.pattern.clone(),
            target: RouteTarget::NotFound,
            specificity: route.specificity,
            seq: route.seq,
        }),
        _ => route.clone(),
    }
}

fn merge(current: impl Iterator<Item = Arc<Route>>, fresh: &[Arc<Route>]) -> Vec<Arc<Route>> {
    let mut next: Vec<Arc<Route>> = current
        .filter(|r| !fresh.iter().any(|f| r.same_key(f)))
        .collect();
    next.extend(fresh.iter().cloned());
    next.sort_by(|a, b| b.specificity.cmp(&a.specificity).then(a.seq.cmp(&b.seq)));
    next
}
