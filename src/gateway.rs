//! Composition root: service registration and the two listeners.
//!
//! # Responsibilities
//! - Turn a `ServiceSpec` into bindings, endpoints, pools and a balancer
//! - Publish them to the route table and balancer registry
//! - Apply masked updates and deletions, one at a time
//! - Serve the HTTP and gRPC listeners until shutdown
//!
//! # Data Flow
//! ```text
//! register(spec)
//!     → ServiceDescriptor::load → extract_bindings
//!     → Endpoint + Pool per address → Balancer(strategy)
//!     → RouteTable::register + BalancerRegistry::register
//!
//! run()
//!     ├─ HTTP listener  → http::router (dispatch, gRPC by content type)
//!     ├─ gRPC listener  → proxy::router (passthrough only)
//!     ├─ pool reaper    → evict_expired + pool gauges
//!     └─ reload loop    → reconcile(config.services)
//! ```
//!
//! # Design Decisions
//! - Register, update and delete hold one mutex for their whole duration;
//!   none of them awaits, and readers only see the swapped snapshots
//! - Delete unpublishes without closing pools, so in-flight calls finish

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::{GatewayConfig, ServiceConfig};
use crate::descriptor::{extract_bindings, HttpBinding, ServiceDescriptor};
use crate::error::GatewayError;
use crate::http::{AppState, DispatchSettings};
use crate::interceptor::{AccessPolicy, Interceptor, InterceptorChain, OpenAccess};
use crate::lifecycle::Shutdown;
use crate::load_balancer::{Balancer, BalancerRegistry, Endpoint, Strategy};
use crate::observability::metrics;
use crate::pool::{GrpcConnector, Pool, PoolConfig, PoolStats};
use crate::proxy::{PassthroughProxy, ProxyMiddleware};
use crate::routing::RouteTable;

/// Identifier handed out by [`Gateway::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceId(Uuid);

impl ServiceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ServiceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for ServiceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSpec {
    pub address: String,
    pub weight: u32,
}

impl EndpointSpec {
    pub fn new(address: impl Into<String>, weight: u32) -> Self {
        Self {
            address: address.into(),
            weight,
        }
    }
}

/// Everything needed to register one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,
    /// Serialized `FileDescriptorSet`.
    pub descriptor: Bytes,
    /// Gateway schema JSON.
    pub schema: Bytes,
    pub endpoints: Vec<EndpointSpec>,
    /// Strategy name; empty means round robin.
    pub strategy: String,
}

impl ServiceSpec {
    /// Read the descriptor and schema files named by `config`, relative to `base_dir`.
    pub fn from_config(config: &ServiceConfig, base_dir: &Path) -> Result<Self, GatewayError> {
        let read = |file: &str| -> Result<Bytes, GatewayError> {
            let path = base_dir.join(file);
            std::fs::read(&path).map(Bytes::from).map_err(|e| {
                GatewayError::Io(std::io::Error::new(
                    e.kind(),
                    format!("{}: {e}", path.display()),
                ))
            })
        };

        Ok(Self {
            name: config.name.clone(),
            descriptor: read(&config.descriptor)?,
            schema: read(&config.schema)?,
            endpoints: config
                .endpoints
                .iter()
                .map(|e| EndpointSpec::new(e.address.clone(), e.weight))
                .collect(),
            strategy: config.strategy.clone(),
        })
    }
}

/// One path of an update mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateField {
    Descriptor,
    Schema,
    Endpoints,
    BalanceStrategy,
}

impl UpdateField {
    pub const ALL: [UpdateField; 4] = [
        UpdateField::Descriptor,
        UpdateField::Schema,
        UpdateField::Endpoints,
        UpdateField::BalanceStrategy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateField::Descriptor => "descriptor",
            UpdateField::Schema => "schema",
            UpdateField::Endpoints => "endpoints",
            UpdateField::BalanceStrategy => "balance_strategy",
        }
    }

    /// Parse field-mask paths. An empty mask selects every field.
    pub fn parse_mask<S: AsRef<str>>(paths: &[S]) -> Result<Vec<UpdateField>, GatewayError> {
        if paths.is_empty() {
            return Ok(Self::ALL.to_vec());
        }
        paths.iter().map(|p| p.as_ref().parse()).collect()
    }
}

impl FromStr for UpdateField {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UpdateField::ALL
            .into_iter()
            .find(|f| f.as_str() == s.trim())
            .ok_or_else(|| GatewayError::InvalidMask(s.to_owned()))
    }
}

/// Published state of one service.
struct RegisteredService {
    spec: ServiceSpec,
    descriptor: Arc<ServiceDescriptor>,
    bindings: Vec<HttpBinding>,
    balancer: Arc<Balancer>,
    /// Registered by `reconcile`, and so removable by it.
    managed: bool,
}

#[derive(Debug, Clone)]
pub struct EndpointSummary {
    pub name: String,
    pub address: String,
    pub weight: u32,
    pub stats: PoolStats,
}

#[derive(Debug, Clone)]
pub struct ServiceSummary {
    pub id: ServiceId,
    pub name: String,
    pub strategy: Strategy,
    pub methods: Vec<String>,
    pub routes: usize,
    pub endpoints: Vec<EndpointSummary>,
}

/// Outcome of applying a reloaded service list.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub registered: usize,
    pub updated: usize,
    pub deleted: usize,
    pub failed: usize,
}

pub struct GatewayBuilder {
    interceptors: Vec<Arc<dyn Interceptor>>,
    policy: Arc<dyn AccessPolicy>,
    middlewares: Vec<Arc<dyn ProxyMiddleware>>,
    settings: DispatchSettings,
    pool_config: PoolConfig,
    connector: GrpcConnector,
    reap_interval: Duration,
    config_dir: PathBuf,
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self {
            interceptors: Vec::new(),
            policy: Arc::new(OpenAccess),
            middlewares: Vec::new(),
            settings: DispatchSettings::default(),
            pool_config: PoolConfig::default(),
            connector: GrpcConnector::default(),
            reap_interval: Duration::from_secs(30),
            config_dir: PathBuf::from("."),
        }
    }
}

impl GatewayBuilder {
    /// Start from the listener, pool and streaming sections of `config`.
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            settings: config.dispatch_settings(),
            pool_config: config.pool.pool_config(),
            connector: config.pool.connector(),
            reap_interval: config.pool.reap_interval(),
            ..Self::default()
        }
    }

    /// Append an interceptor; they run in insertion order.
    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn policy(mut self, policy: Arc<dyn AccessPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn proxy_middleware(mut self, middleware: Arc<dyn ProxyMiddleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn settings(mut self, settings: DispatchSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    pub fn connector(mut self, connector: GrpcConnector) -> Self {
        self.connector = connector;
        self
    }

    pub fn reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    /// Directory that relative descriptor and schema paths resolve against.
    pub fn config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_dir = dir.into();
        self
    }

    pub fn build(self) -> Gateway {
        let routes = Arc::new(RouteTable::new());
        let balancers = Arc::new(BalancerRegistry::new());

        let mut proxy = PassthroughProxy::new(balancers.clone())
            .with_policy(self.policy.clone())
            .with_buffer(self.settings.stream_buffer);
        for middleware in self.middlewares {
            proxy = proxy.with_middleware(middleware);
        }

        Gateway {
            routes,
            balancers,
            proxy: Arc::new(proxy),
            interceptors: InterceptorChain::new(self.interceptors),
            policy: self.policy,
            settings: Arc::new(self.settings),
            pool_config: self.pool_config,
            connector: self.connector,
            reap_interval: self.reap_interval,
            config_dir: self.config_dir,
            services: Mutex::new(HashMap::new()),
        }
    }
}

pub struct Gateway {
    routes: Arc<RouteTable>,
    balancers: Arc<BalancerRegistry>,
    proxy: Arc<PassthroughProxy>,
    interceptors: InterceptorChain,
    policy: Arc<dyn AccessPolicy>,
    settings: Arc<DispatchSettings>,
    pool_config: PoolConfig,
    connector: GrpcConnector,
    reap_interval: Duration,
    config_dir: PathBuf,
    services: Mutex<HashMap<ServiceId, RegisteredService>>,
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("services", &self.services.lock().len())
            .field("routes", &self.routes.len())
            .field("settings", &self.settings)
            .finish()
    }
}

impl Default for Gateway {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Gateway {
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::default()
    }

    /// Load, bind and publish a new service.
    pub fn register(&self, spec: ServiceSpec) -> Result<ServiceId, GatewayError> {
        self.register_inner(spec, false)
    }

    fn register_inner(&self, spec: ServiceSpec, managed: bool) -> Result<ServiceId, GatewayError> {
        let mut services = self.services.lock();

        let strategy: Strategy = spec.strategy.parse()?;
        let descriptor = Arc::new(ServiceDescriptor::load(spec.descriptor.clone())?);
        let bindings = extract_bindings(&descriptor, &spec.schema)?;
        let balancer = Arc::new(Balancer::new(strategy, self.endpoints(&spec)));

        let id = ServiceId::new();
        self.routes.register(id, &bindings);
        self.balancers.register(balancer.clone(), &descriptor);

        tracing::info!(
            service = %spec.name,
            id = %id,
            routes = bindings.len(),
            endpoints = spec.endpoints.len(),
            strategy = %strategy,
            "Service registered"
        );

        services.insert(
            id,
            RegisteredService {
                spec,
                descriptor,
                bindings,
                balancer,
                managed,
            },
        );
        metrics::set_registered_services(services.len());
        Ok(id)
    }

    /// Replace the masked fields of a registered service.
    ///
    /// Unchanged parts are reused: endpoints (and their pools) survive a
    /// schema-only update, and the descriptor survives an endpoint change.
    pub fn update<S: AsRef<str>>(
        &self,
        id: ServiceId,
        mask: &[S],
        spec: ServiceSpec,
    ) -> Result<(), GatewayError> {
        let fields = UpdateField::parse_mask(mask)?;
        let mut services = self.services.lock();
        let current = services
            .get(&id)
            .ok_or(GatewayError::UnknownService(id))?;

        let mut next = current.spec.clone();
        for field in &fields {
            match field {
                UpdateField::Descriptor => next.descriptor = spec.descriptor.clone(),
                UpdateField::Schema => next.schema = spec.schema.clone(),
                UpdateField::Endpoints => next.endpoints = spec.endpoints.clone(),
                UpdateField::BalanceStrategy => next.strategy = spec.strategy.clone(),
            }
        }
        if !spec.name.is_empty() {
            next.name = spec.name;
        }

        let descriptor_changed = next.descriptor != current.spec.descriptor;
        let schema_changed = next.schema != current.spec.schema;
        let endpoints_changed = next.endpoints != current.spec.endpoints;

        let strategy: Strategy = next.strategy.parse()?;
        let descriptor = if descriptor_changed {
            Arc::new(ServiceDescriptor::load(next.descriptor.clone())?)
        } else {
            current.descriptor.clone()
        };
        let bindings = if descriptor_changed || schema_changed {
            extract_bindings(&descriptor, &next.schema)?
        } else {
            current.bindings.clone()
        };
        let balancer = if endpoints_changed || strategy != current.balancer.strategy() {
            let endpoints = if endpoints_changed {
                self.endpoints(&next)
            } else {
                current.balancer.endpoints().to_vec()
            };
            Arc::new(Balancer::new(strategy, endpoints))
        } else {
            current.balancer.clone()
        };

        if descriptor_changed || schema_changed {
            self.routes.replace(id, &bindings);
        }
        self.balancers.replace(
            &current.balancer,
            &current.descriptor,
            balancer.clone(),
            &descriptor,
        );

        tracing::info!(
            service = %next.name,
            id = %id,
            fields = ?fields.iter().map(UpdateField::as_str).collect::<Vec<_>>(),
            routes = bindings.len(),
            "Service updated"
        );

        let managed = current.managed;
        services.insert(
            id,
            RegisteredService {
                spec: next,
                descriptor,
                bindings,
                balancer,
                managed,
            },
        );
        Ok(())
    }

    /// Unpublish a service. Its routes answer 404 from now on; calls already
    /// holding a connection run to completion.
    pub fn delete(&self, id: ServiceId) -> Result<(), GatewayError> {
        let mut services = self.services.lock();
        let removed = services
            .remove(&id)
            .ok_or(GatewayError::UnknownService(id))?;

        self.routes.delete(id);
        self.balancers.delete(&removed.balancer, &removed.descriptor);

        tracing::info!(service = %removed.spec.name, id = %id, "Service deleted");
        metrics::set_registered_services(services.len());
        Ok(())
    }

    /// Registered services with their method keys and pool stats.
    pub fn services(&self) -> Vec<ServiceSummary> {
        let services = self.services.lock();
        let mut summaries: Vec<ServiceSummary> = services
            .iter()
            .map(|(id, service)| ServiceSummary {
                id: *id,
                name: service.spec.name.clone(),
                strategy: service.balancer.strategy(),
                methods: service.descriptor.method_keys(),
                routes: service.bindings.len(),
                endpoints: service
                    .balancer
                    .endpoints()
                    .iter()
                    .map(|e| EndpointSummary {
                        name: e.name().to_owned(),
                        address: e.address().to_owned(),
                        weight: e.weight(),
                        stats: e.stats(),
                    })
                    .collect(),
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// Look up a service by name.
    pub fn find(&self, name: &str) -> Option<ServiceId> {
        self.services
            .lock()
            .iter()
            .find(|(_, s)| s.spec.name == name)
            .map(|(id, _)| *id)
    }

    /// Bring services in line with a config file's `[[services]]` list.
    ///
    /// Services are matched by name. Services registered through
    /// [`Gateway::register`] are never deleted here.
    pub fn reconcile(&self, configs: &[ServiceConfig]) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        for config in configs {
            let spec = match ServiceSpec::from_config(config, &self.config_dir) {
                Ok(spec) => spec,
                Err(e) => {
                    tracing::error!(service = %config.name, error = %e, "Failed to read service files");
                    report.failed += 1;
                    continue;
                }
            };

            let existing = self.current_spec(&config.name);
            let result = match existing {
                None => self.register_inner(spec, true).map(|_| report.registered += 1),
                Some((_, current)) if current == spec => Ok(()),
                Some((id, _)) => self
                    .update(id, &[] as &[&str], spec)
                    .map(|_| report.updated += 1),
            };
            if let Err(e) = result {
                tracing::error!(service = %config.name, error = %e, "Failed to apply service config");
                report.failed += 1;
            }
        }

        let stale: Vec<ServiceId> = self
            .services
            .lock()
            .iter()
            .filter(|(_, s)| s.managed && !configs.iter().any(|c| c.name == s.spec.name))
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            if self.delete(id).is_ok() {
                report.deleted += 1;
            }
        }

        tracing::info!(?report, "Services reconciled");
        report
    }

    fn current_spec(&self, name: &str) -> Option<(ServiceId, ServiceSpec)> {
        self.services
            .lock()
            .iter()
            .find(|(_, s)| s.spec.name == name)
            .map(|(id, s)| (*id, s.spec.clone()))
    }

    fn endpoints(&self, spec: &ServiceSpec) -> Vec<Arc<Endpoint>> {
        spec.endpoints
            .iter()
            .enumerate()
            .map(|(i, e)| {
                let pool = Pool::new(e.address.clone(), self.connector.clone(), self.pool_config.clone());
                Arc::new(Endpoint::new(
                    format!("{}-{i}", spec.name),
                    e.address.clone(),
                    e.weight,
                    pool,
                ))
            })
            .collect()
    }

    fn state(&self) -> AppState {
        AppState {
            routes: self.routes.clone(),
            balancers: self.balancers.clone(),
            interceptors: self.interceptors.clone(),
            policy: self.policy.clone(),
            proxy: self.proxy.clone(),
            settings: self.settings.clone(),
        }
    }

    /// Router for the HTTP listener.
    pub fn http_router(&self) -> Router {
        crate::http::router(self.state())
    }

    /// Router for the internal gRPC listener.
    pub fn grpc_router(&self) -> Router {
        crate::proxy::router(self.proxy.clone())
    }

    /// Serve both listeners until `shutdown` fires.
    ///
    /// Also runs the pool reaper and applies every config received on `updates`.
    pub async fn run(
        self: Arc<Self>,
        http_listener: TcpListener,
        grpc_listener: TcpListener,
        updates: mpsc::UnboundedReceiver<GatewayConfig>,
        shutdown: Shutdown,
    ) -> Result<(), GatewayError> {
        let grpc_addr = grpc_listener.local_addr()?;
        self.proxy.set_local_ip(grpc_addr.ip());

        tracing::info!(
            http = %http_listener.local_addr()?,
            grpc = %grpc_addr,
            "Gateway listening"
        );

        let http = {
            let shutdown = shutdown.clone();
            let app = self.http_router();
            async move {
                axum::serve(
                    http_listener,
                    app.into_make_service_with_connect_info::<SocketAddr>(),
                )
                .with_graceful_shutdown(async move { shutdown.wait().await })
                .await
                .map_err(GatewayError::from)
            }
        };

        let grpc = {
            let shutdown = shutdown.clone();
            let app = self.grpc_router();
            async move {
                axum::serve(
                    grpc_listener,
                    app.into_make_service_with_connect_info::<SocketAddr>(),
                )
                .with_graceful_shutdown(async move { shutdown.wait().await })
                .await
                .map_err(GatewayError::from)
            }
        };

        tokio::try_join!(
            http,
            grpc,
            self.clone().reap_pools(shutdown.clone()),
            self.clone().apply_updates(updates, shutdown.clone()),
        )?;

        tracing::info!("Gateway stopped");
        Ok(())
    }

    async fn reap_pools(self: Arc<Self>, shutdown: Shutdown) -> Result<(), GatewayError> {
        let mut ticker = tokio::time::interval(self.reap_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.wait() => return Ok(()),
                _ = ticker.tick() => {}
            }

            let endpoints: Vec<Arc<Endpoint>> = self
                .services
                .lock()
                .values()
                .flat_map(|s| s.balancer.endpoints().to_vec())
                .collect();

            let mut evicted = 0;
            for endpoint in &endpoints {
                evicted += endpoint.pool().evict_expired();
                metrics::record_pool(endpoint.name(), endpoint.stats());
            }
            if evicted > 0 {
                tracing::debug!(evicted, "Idle connections reaped");
            }
        }
    }

    async fn apply_updates(
        self: Arc<Self>,
        mut updates: mpsc::UnboundedReceiver<GatewayConfig>,
        shutdown: Shutdown,
    ) -> Result<(), GatewayError> {
        loop {
            tokio::select! {
                _ = shutdown.wait() => return Ok(()),
                update = updates.recv() => match update {
                    Some(config) => {
                        self.reconcile(&config.services);
                    }
                    None => {
                        shutdown.wait().await;
                        return Ok(());
                    }
                },
            }
        }
    }
}
