use crate::balance::{Criteria, LoadBalancer, create_balancer, try_half_open_probe};
use crate::breaker::{CircuitBreakerChain, InstanceGauge};
use crate::conf::{LoadBalancerConfig, ServiceConfigView};
use crate::error::{ApiError, ApiResult};
use crate::health::HealthCheckerChain;
use crate::model::{ClientLocation, Instance, ServiceData, ServiceInstances, ServiceKey};
use crate::monitor::MonitorSink;
use crate::registry::ServiceStore;
use crate::route::{
    ClearableCache, MetadataParam, RouteInfo, RouteInfoNotify, RouterChain, SourceService, join_map,
};
use crate::sched::Executor;
use crate::weight::SlowStartAdjuster;
use arc_swap::ArcSwapOption;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Enough of a past request to replay the route pipeline when the breaker
/// version advances, so filter caches rebuild off the hot path.
#[derive(Debug, Clone)]
struct CacheUpdateParam {
    source: Option<SourceService>,
    labels: std::collections::BTreeMap<String, String>,
    metadata: Option<MetadataParam>,
    include_unhealthy: bool,
    include_circuit_open: bool,
}

impl CacheUpdateParam {
    fn from_route_info(route_info: &RouteInfo) -> Self {
        Self {
            source: route_info.source().cloned(),
            labels: route_info.labels().clone(),
            metadata: route_info.metadata_param().cloned(),
            include_unhealthy: route_info.include_unhealthy(),
            include_circuit_open: route_info.include_circuit_open(),
        }
    }

    fn identity(&self) -> String {
        let mut identity = String::new();
        if let Some(source) = &self.source {
            if let Some(key) = &source.service {
                identity.push_str(&key.to_string());
            }
            identity.push('|');
            identity.push_str(&join_map(&source.metadata));
        }
        identity.push('#');
        identity.push_str(&join_map(&self.labels));
        identity.push('#');
        if let Some(param) = &self.metadata {
            identity.push_str(&join_map(&param.metadata));
            identity.push(':');
            identity.push_str(param.failover.as_str());
        }
        identity.push('#');
        identity.push(char::from(b'0' + self.include_unhealthy as u8));
        identity.push(char::from(b'0' + self.include_circuit_open as u8));
        identity
    }

    fn build_route_info(&self, service_key: &ServiceKey) -> RouteInfo {
        let mut route_info = RouteInfo::new(service_key.clone(), self.source.clone());
        route_info.set_labels(self.labels.clone());
        if let Some(param) = &self.metadata {
            route_info.set_metadata_param(param.clone());
        }
        if self.include_unhealthy {
            route_info.set_include_unhealthy();
        }
        if self.include_circuit_open {
            route_info.set_include_circuit_open();
        }
        route_info
    }
}

/// Per-service bundle created lazily by the client context: router chain,
/// balancers, breaker and health chains, weight adjuster, and the current
/// instance/route snapshots.
pub struct ServiceContext {
    service_key: ServiceKey,
    router_chain: RouterChain,
    lb_config: LoadBalancerConfig,
    default_balancer: Arc<dyn LoadBalancer>,
    extra_balancers: Mutex<HashMap<String, Arc<dyn LoadBalancer>>>,
    breaker_chain: Arc<CircuitBreakerChain>,
    health_chain: Arc<HealthCheckerChain>,
    weight_adjuster: Arc<SlowStartAdjuster>,
    instances: ArcSwapOption<ServiceData>,
    routings: ArcSwapOption<ServiceData>,
    cache_updates: Mutex<HashMap<String, CacheUpdateParam>>,
    store: Arc<ServiceStore>,
    cache_executor: Arc<Executor>,
}

impl ServiceContext {
    pub fn new(
        service_key: ServiceKey,
        view: &ServiceConfigView,
        store: Arc<ServiceStore>,
        client_location: Arc<ClientLocation>,
        monitor: Arc<dyn MonitorSink>,
        cache_executor: Arc<Executor>,
    ) -> ApiResult<Arc<Self>> {
        let router_chain = RouterChain::new(
            service_key.clone(),
            &view.service_router,
            Arc::clone(&store),
            client_location,
            Arc::clone(&monitor),
        )?;
        let default_balancer = create_balancer(&view.load_balancer.kind, &view.load_balancer)?;
        let breaker_chain = Arc::new(CircuitBreakerChain::new(
            service_key.clone(),
            &view.circuit_breaker,
            view.health_check.when,
            Arc::clone(&store),
            monitor,
        )?);
        let health_chain = Arc::new(HealthCheckerChain::new(
            service_key.clone(),
            &view.health_check,
            Arc::clone(&store),
        )?);
        Ok(Arc::new(Self {
            service_key,
            router_chain,
            lb_config: view.load_balancer.clone(),
            default_balancer,
            extra_balancers: Mutex::new(HashMap::new()),
            breaker_chain,
            health_chain,
            weight_adjuster: Arc::new(SlowStartAdjuster::new(view.weight_adjuster.clone())),
            instances: ArcSwapOption::empty(),
            routings: ArcSwapOption::empty(),
            cache_updates: Mutex::new(HashMap::new()),
            store,
            cache_executor,
        }))
    }

    pub fn service_key(&self) -> &ServiceKey {
        &self.service_key
    }

    pub fn breaker_chain(&self) -> &Arc<CircuitBreakerChain> {
        &self.breaker_chain
    }

    pub fn health_chain(&self) -> &Arc<HealthCheckerChain> {
        &self.health_chain
    }

    /// Everything trimmable by the background cache sweeper.
    pub fn clearables(&self) -> Vec<Arc<dyn ClearableCache>> {
        let mut clearables: Vec<Arc<dyn ClearableCache>> = self
            .router_chain
            .filters()
            .iter()
            .map(|filter| filter.clearable())
            .collect();
        if let Some(cache) = self.default_balancer.clearable() {
            clearables.push(cache);
        }
        for balancer in self.extra_balancers.lock().unwrap().values() {
            if let Some(cache) = balancer.clearable() {
                clearables.push(cache);
            }
        }
        clearables
    }

    /// The configured balancer, or an on-demand one for an explicit type.
    pub fn balancer(&self, kind: &str) -> ApiResult<Arc<dyn LoadBalancer>> {
        if kind.is_empty() || kind == self.lb_config.kind {
            return Ok(Arc::clone(&self.default_balancer));
        }
        let mut extra = self.extra_balancers.lock().unwrap();
        if let Some(balancer) = extra.get(kind) {
            return Ok(Arc::clone(balancer));
        }
        let balancer = create_balancer(kind, &self.lb_config)?;
        extra.insert(kind.to_string(), Arc::clone(&balancer));
        Ok(balancer)
    }

    /// Wires the current snapshots into `route_info`, then blocks (up to
    /// `timeout`) for whatever is still missing.
    pub fn prepare(&self, route_info: &mut RouteInfo, timeout: Duration) -> ApiResult<()> {
        self.wire_current(route_info);
        self.router_chain.prepare(route_info, timeout)
    }

    /// Non-blocking variant used by the async API.
    pub fn prepare_with_notify(
        &self,
        route_info: &mut RouteInfo,
    ) -> ApiResult<Option<RouteInfoNotify>> {
        self.wire_current(route_info);
        self.router_chain.prepare_with_notify(route_info)
    }

    fn wire_current(&self, route_info: &mut RouteInfo) {
        if route_info.service_instances().is_none()
            && let Some(data) = self.instances.load_full()
            && let Some(service) = data.service()
            && let Some(instances) = ServiceInstances::new(data, service)
        {
            route_info.set_service_instances(instances);
        }
        if route_info.route_rule().is_none()
            && let Some(routings) = self.routings.load_full()
        {
            route_info.set_route_rule(routings);
        }
    }

    /// Runs the filter pipeline and remembers the request shape so breaker
    /// version bumps can rebuild the caches it touched.
    pub fn do_route(&self, route_info: &mut RouteInfo) -> ApiResult<()> {
        let param = CacheUpdateParam::from_route_info(route_info);
        self.cache_updates
            .lock()
            .unwrap()
            .entry(param.identity())
            .or_insert(param);
        self.router_chain.do_route(route_info)
    }

    /// New instances snapshot: swap the pointer and let the weight adjuster
    /// seed slow starts for newly appeared members.
    pub fn update_instances(self: &Arc<Self>, data: Arc<ServiceData>) {
        let old = if data.instances().is_some() {
            self.instances.swap(Some(Arc::clone(&data)))
        } else {
            self.instances.swap(None)
        };
        let need_ramp_task = self
            .weight_adjuster
            .on_instances_update(&data, old.as_deref());
        if need_ramp_task {
            self.arm_weight_ramp();
        }
    }

    pub fn update_routings(&self, data: Arc<ServiceData>) {
        if data.route_rule().is_some() {
            self.routings.swap(Some(data));
        } else {
            self.routings.swap(None);
        }
    }

    pub fn current_instances(&self) -> Option<Arc<ServiceData>> {
        self.instances.load_full()
    }

    pub fn check_instance_exists(&self, instance_id: &str) -> bool {
        self.instances
            .load_full()
            .and_then(|data| data.instances().map(|i| i.contains(instance_id)))
            .unwrap_or(false)
    }

    /// Feeds a call result to the breaker chain (and the locality-aware
    /// balancer when tagged); schedules a cache refresh when the breaker
    /// version advanced.
    pub fn on_call_result(self: &Arc<Self>, gauge: &InstanceGauge) -> ApiResult<()> {
        if gauge.locality_tag != 0 {
            let balancer = self.balancer(crate::conf::LB_LOCALITY_AWARE)?;
            balancer.feedback(&gauge.instance_id, gauge.latency.as_micros() as u64);
        }
        if let Some(version) = self.breaker_chain.real_time_break(gauge) {
            self.submit_cache_update(version);
        }
        Ok(())
    }

    /// Periodic breaker pass, driven by the breaker executor.
    pub fn timing_circuit_break(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let exists = move |instance_id: &str| this.check_instance_exists(instance_id);
        if let Some(version) = self.breaker_chain.timing_break(&exists) {
            self.submit_cache_update(version);
        }
    }

    fn submit_cache_update(self: &Arc<Self>, version: u64) {
        let this = Arc::clone(self);
        self.cache_executor.submit(move || {
            this.update_circuit_breaker(version);
        });
    }

    /// Replays the recorded request shapes so every filter cache publishes
    /// entries for the new breaker version before callers ask.
    pub fn update_circuit_breaker(&self, version: u64) {
        debug!(service = %self.service_key, version, "rebuilding route caches");
        let params: Vec<CacheUpdateParam> = {
            let updates = self.cache_updates.lock().unwrap();
            updates.values().cloned().collect()
        };
        for param in params {
            let mut route_info = param.build_route_info(&self.service_key);
            self.wire_current(&mut route_info);
            if route_info.service_instances().is_none() {
                continue;
            }
            // A failed replay just means the next caller recomputes.
            let _ = self.router_chain.do_route(&mut route_info);
        }
    }

    fn arm_weight_ramp(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let step = self.weight_adjuster.step_size();
        self.cache_executor.submit_timing(step, move || {
            let Some(data) = this.instances.load_full() else {
                return None;
            };
            let keep_going = this.weight_adjuster.adjust(&data);
            if let Some(service) = this.store.service(&this.service_key) {
                let version = service.dynamic_weight_version() + 1;
                service.commit_dynamic_weight_version(version);
            }
            keep_going.then(|| crate::cache::clock::steady_ms() + step.as_millis() as u64)
        });
    }

    /// Route, then balance: the primary selection path shared by the
    /// one-instance APIs.
    pub fn choose_one(
        &self,
        route_info: &mut RouteInfo,
        balancer: &Arc<dyn LoadBalancer>,
        criteria: &Criteria,
    ) -> ApiResult<Arc<Instance>> {
        let instances = route_info
            .service_instances()
            .ok_or(ApiError::InvalidState)?;
        if !criteria.ignore_half_open
            && let Some(probe) = try_half_open_probe(instances)
        {
            return Ok(probe);
        }
        balancer.choose(instances, criteria)
    }
}
