use crate::error::{ApiError, ApiResult};
use crate::model::{Instance, InstancesSet, constants};
use crate::monitor::MonitorSink;
use crate::route::filters::{RouteFilter, report_recover_edge};
use crate::route::{
    ClearableCache, FilterCache, RouteInfo, SubsetCacheValue, router_bit, unfit_instance_ids,
};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CanaryCacheKey {
    prior: usize,
    circuit_version: u64,
    canary_value: String,
}

/// Prefers instances whose canary tag matches the request; degrades through
/// plain and mismatching canary groups, healthy before unhealthy.
pub struct CanaryFilter {
    monitor: Arc<dyn MonitorSink>,
    cache: Arc<FilterCache<CanaryCacheKey, SubsetCacheValue>>,
}

impl CanaryFilter {
    pub fn new(monitor: Arc<dyn MonitorSink>) -> Self {
        Self {
            monitor,
            cache: Arc::new(FilterCache::new()),
        }
    }

    /// Without a requested canary value: plain healthy instances first.
    /// Returns (result, recover_all).
    fn calculate_without_value(
        candidates: &[Arc<Instance>],
        unfit: &std::collections::HashSet<String>,
    ) -> (Vec<Arc<Instance>>, bool) {
        let mut plain_healthy = Vec::new();
        let mut plain_unhealthy = Vec::new();
        let mut canary_healthy = Vec::new();
        let mut canary_unhealthy = Vec::new();
        for instance in candidates {
            let healthy = !unfit.contains(instance.id());
            match (instance.canary().is_some(), healthy) {
                (false, true) => plain_healthy.push(Arc::clone(instance)),
                (false, false) => plain_unhealthy.push(Arc::clone(instance)),
                (true, true) => canary_healthy.push(Arc::clone(instance)),
                (true, false) => canary_unhealthy.push(Arc::clone(instance)),
            }
        }
        if !plain_healthy.is_empty() {
            return (plain_healthy, false);
        }
        for fallback in [canary_healthy, plain_unhealthy, canary_unhealthy] {
            if !fallback.is_empty() {
                return (fallback, true);
            }
        }
        (Vec::new(), false)
    }

    /// With a requested canary value: exact canary match first, then plain,
    /// then other canaries; healthy groups before unhealthy ones.
    fn calculate_with_value(
        candidates: &[Arc<Instance>],
        canary_value: &str,
        unfit: &std::collections::HashSet<String>,
    ) -> (Vec<Arc<Instance>>, bool) {
        let mut select_healthy = Vec::new();
        let mut select_unhealthy = Vec::new();
        let mut plain_healthy = Vec::new();
        let mut plain_unhealthy = Vec::new();
        let mut other_healthy = Vec::new();
        let mut other_unhealthy = Vec::new();
        for instance in candidates {
            let healthy = !unfit.contains(instance.id());
            let bucket = match instance.canary() {
                Some(tag) if tag == canary_value => {
                    if healthy { &mut select_healthy } else { &mut select_unhealthy }
                }
                Some(_) => {
                    if healthy { &mut other_healthy } else { &mut other_unhealthy }
                }
                None => {
                    if healthy { &mut plain_healthy } else { &mut plain_unhealthy }
                }
            };
            bucket.push(Arc::clone(instance));
        }
        if !select_healthy.is_empty() {
            return (select_healthy, false);
        }
        for fallback in [
            plain_healthy,
            other_healthy,
            select_unhealthy,
            plain_unhealthy,
            other_unhealthy,
        ] {
            if !fallback.is_empty() {
                return (fallback, true);
            }
        }
        (Vec::new(), false)
    }
}

impl RouteFilter for CanaryFilter {
    fn name(&self) -> &'static str {
        "canaryRouter"
    }

    fn bit(&self) -> u8 {
        router_bit::CANARY
    }

    fn filter(&self, route_info: &mut RouteInfo) -> ApiResult<()> {
        let instances = route_info.service_instances().ok_or(ApiError::InvalidState)?;
        if !instances.is_canary_enabled() {
            return Ok(());
        }
        let service_key = instances.service_data().service_key().clone();

        let canary_value = route_info
            .source()
            .and_then(|source| source.metadata.get(constants::CANARY_KEY))
            .cloned()
            .unwrap_or_default();

        let key = CanaryCacheKey {
            prior: instances.available().ptr_id(),
            circuit_version: instances.service().circuit_breaker_version(),
            canary_value: canary_value.clone(),
        };

        let value = match self.cache.get(&key) {
            Some(value) => value,
            None => {
                let prior = Arc::clone(instances.available());
                let unfit = unfit_instance_ids(route_info, instances);
                let (result, recover_all) = if canary_value.is_empty() {
                    Self::calculate_without_value(prior.instances(), &unfit)
                } else {
                    Self::calculate_with_value(prior.instances(), &canary_value, &unfit)
                };
                let mut subset = BTreeMap::new();
                subset.insert(constants::CANARY_KEY.to_string(), canary_value.clone());
                let current = if recover_all {
                    let recover_info = if canary_value.is_empty() {
                        "no healthy canary candidates".to_string()
                    } else {
                        format!("canary:{canary_value}")
                    };
                    Arc::new(InstancesSet::with_recover_info(result, subset, recover_info))
                } else {
                    Arc::new(InstancesSet::with_subset(result, subset))
                };
                report_recover_edge(
                    &self.monitor,
                    &service_key,
                    &prior,
                    recover_all,
                    &canary_value,
                );
                let value = Arc::new(SubsetCacheValue {
                    instances_data: Arc::clone(instances.service_data()),
                    prior,
                    current,
                });
                self.cache.put(key, Arc::clone(&value));
                value
            }
        };

        value.current.record_hit();
        let current = Arc::clone(&value.current);
        route_info
            .service_instances_mut()
            .ok_or(ApiError::InvalidState)?
            .update_available(current);
        Ok(())
    }

    fn clearable(&self) -> Arc<dyn ClearableCache> {
        Arc::clone(&self.cache) as _
    }
}
