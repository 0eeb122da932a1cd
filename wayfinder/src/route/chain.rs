use crate::conf::{self, ServiceRouterConfig};
use crate::error::{ApiError, ApiResult};
use crate::model::{ClientLocation, DataKind, DataStatus, ServiceInstances, ServiceKey};
use crate::monitor::MonitorSink;
use crate::registry::ServiceStore;
use crate::route::filters::*;
use crate::route::{NotifySlot, RouteFilter, RouteInfo, RouteInfoNotify};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::error;

/// Ordered chain of routing filters for one service, plus the data-readiness
/// protocol that feeds it.
pub struct RouterChain {
    service_key: ServiceKey,
    enabled: bool,
    rule_router_enabled: bool,
    filters: Vec<Arc<dyn RouteFilter>>,
    store: Arc<ServiceStore>,
}

impl RouterChain {
    pub fn new(
        service_key: ServiceKey,
        config: &ServiceRouterConfig,
        store: Arc<ServiceStore>,
        client_location: Arc<ClientLocation>,
        monitor: Arc<dyn MonitorSink>,
    ) -> ApiResult<Self> {
        let mut filters: Vec<Arc<dyn RouteFilter>> = Vec::new();
        let mut rule_router_enabled = false;
        if config.enable {
            for name in &config.chain {
                match name.as_str() {
                    conf::ROUTER_RULE => {
                        rule_router_enabled = true;
                        filters.push(Arc::new(RuleFilter::new(
                            config.enable_recover_all,
                            Arc::clone(&monitor),
                        )));
                    }
                    conf::ROUTER_NEARBY => {
                        filters.push(Arc::new(NearbyFilter::new(
                            config.nearby_based_router.clone(),
                            Arc::clone(&client_location),
                            Arc::clone(&monitor),
                        )?));
                    }
                    conf::ROUTER_SET_DIVISION => {
                        filters.push(Arc::new(SetDivisionFilter::new()));
                    }
                    conf::ROUTER_CANARY => {
                        filters.push(Arc::new(CanaryFilter::new(Arc::clone(&monitor))));
                    }
                    conf::ROUTER_METADATA => {
                        filters.push(Arc::new(MetadataFilter::new(Arc::clone(&monitor))));
                    }
                    other => {
                        error!(router = other, "unknown service router plugin");
                        return Err(ApiError::PluginError);
                    }
                }
            }
        }
        Ok(Self {
            service_key,
            enabled: config.enable,
            rule_router_enabled,
            filters,
            store,
        })
    }

    pub fn is_rule_router_enabled(&self) -> bool {
        self.rule_router_enabled
    }

    pub fn filters(&self) -> &[Arc<dyn RouteFilter>] {
        &self.filters
    }

    /// Locates every snapshot the pipeline needs, subscribing for the
    /// missing ones. Returns a notify when something is still in flight.
    pub fn prepare_with_notify(
        &self,
        route_info: &mut RouteInfo,
    ) -> ApiResult<Option<RouteInfoNotify>> {
        let mut pending = RouteInfoNotify::default();

        if route_info.service_instances().is_none() {
            match self.store.get_service_data(&self.service_key, DataKind::Instances) {
                Ok(data) => {
                    if data.status() == DataStatus::NotFound {
                        return Err(ApiError::ServiceNotFound);
                    }
                    let service = data.service().ok_or(ApiError::InvalidState)?;
                    let instances =
                        ServiceInstances::new(data, service).ok_or(ApiError::InvalidState)?;
                    route_info.set_service_instances(instances);
                }
                Err(_) => {
                    let (current, notify) = self
                        .store
                        .load_or_subscribe(&self.service_key, DataKind::Instances);
                    pending.push(NotifySlot::TargetInstances, current, notify);
                }
            }
        }

        if self.rule_router_enabled && route_info.route_rule().is_none() {
            match self.store.get_service_data(&self.service_key, DataKind::RouteRule) {
                Ok(data) => route_info.set_route_rule(data),
                Err(_) => {
                    let (current, notify) = self
                        .store
                        .load_or_subscribe(&self.service_key, DataKind::RouteRule);
                    pending.push(NotifySlot::TargetRule, current, notify);
                }
            }
        }

        if self.rule_router_enabled
            && route_info.source_route_rule().is_none()
            && let Some(source_key) = route_info.source().and_then(|s| s.service.clone())
            && !source_key.name.is_empty()
        {
            match self.store.get_service_data(&source_key, DataKind::RouteRule) {
                Ok(data) => route_info.set_source_route_rule(data),
                Err(_) => {
                    let (current, notify) =
                        self.store.load_or_subscribe(&source_key, DataKind::RouteRule);
                    pending.push(NotifySlot::SourceRule, current, notify);
                }
            }
        }

        Ok((!pending.is_empty()).then_some(pending))
    }

    /// Blocking prepare: waits for missing data up to `timeout`, then falls
    /// back to disk-loaded snapshots if the control plane stayed silent.
    pub fn prepare(&self, route_info: &mut RouteInfo, timeout: Duration) -> ApiResult<()> {
        let Some(pending) = self.prepare_with_notify(route_info)? else {
            return Ok(());
        };
        match pending.wait_until(Instant::now() + timeout) {
            Ok(()) => pending.drain_into(route_info, false),
            Err(ApiError::Timeout) if pending.is_ready(true) => {
                pending.drain_into(route_info, true)
            }
            Err(err) => Err(err),
        }
    }

    /// Runs the enabled filters in order. Aborts early when a filter
    /// rejects the whole candidate set.
    pub fn do_route(&self, route_info: &mut RouteInfo) -> ApiResult<()> {
        if route_info.service_instances().is_none() {
            return Err(ApiError::InvalidState);
        }
        if !self.enabled {
            return Ok(());
        }
        for filter in &self.filters {
            if !route_info.router_enabled(filter.bit()) {
                continue;
            }
            filter.filter(route_info)?;
        }
        Ok(())
    }
}
