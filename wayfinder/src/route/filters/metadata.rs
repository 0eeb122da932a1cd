use crate::error::{ApiError, ApiResult};
use crate::model::{Instance, InstancesSet};
use crate::monitor::MonitorSink;
use crate::route::filters::{RouteFilter, report_recover_edge};
use crate::route::{
    ClearableCache, FilterCache, MetadataFailover, RouteInfo, SubsetCacheValue, join_map,
    router_bit, unfit_instance_ids,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MetadataCacheKey {
    prior: usize,
    circuit_version: u64,
    metadata: String,
    failover: &'static str,
}

/// Exact-match filtering on request metadata, with a configurable fallback
/// when nothing matches.
pub struct MetadataFilter {
    monitor: Arc<dyn MonitorSink>,
    cache: Arc<FilterCache<MetadataCacheKey, SubsetCacheValue>>,
}

fn metadata_match(
    wanted: &BTreeMap<String, String>,
    instance_metadata: &BTreeMap<String, String>,
) -> bool {
    if wanted.len() > instance_metadata.len() {
        return false;
    }
    wanted
        .iter()
        .all(|(key, value)| instance_metadata.get(key) == Some(value))
}

fn metadata_match_not_key(
    wanted: &BTreeMap<String, String>,
    instance_metadata: &BTreeMap<String, String>,
) -> bool {
    if instance_metadata.is_empty() {
        return true;
    }
    wanted.keys().all(|key| !instance_metadata.contains_key(key))
}

impl MetadataFilter {
    pub fn new(monitor: Arc<dyn MonitorSink>) -> Self {
        Self {
            monitor,
            cache: Arc::new(FilterCache::new()),
        }
    }

    fn split_by_health(
        candidates: &[Arc<Instance>],
        unfit: &HashSet<String>,
        keep: impl Fn(&Instance) -> bool,
    ) -> (Vec<Arc<Instance>>, Vec<Arc<Instance>>) {
        let mut healthy = Vec::new();
        let mut unhealthy = Vec::new();
        for instance in candidates {
            if !keep(instance) {
                continue;
            }
            if unfit.contains(instance.id()) {
                unhealthy.push(Arc::clone(instance));
            } else {
                healthy.push(Arc::clone(instance));
            }
        }
        (healthy, unhealthy)
    }

    /// Returns (result, recover_all).
    fn calculate(
        candidates: &[Arc<Instance>],
        unfit: &HashSet<String>,
        wanted: &BTreeMap<String, String>,
        failover: MetadataFailover,
    ) -> (Vec<Arc<Instance>>, bool) {
        let (healthy, unhealthy) =
            Self::split_by_health(candidates, unfit, |instance| {
                metadata_match(wanted, instance.metadata())
            });
        if !healthy.is_empty() {
            return (healthy, false);
        }
        if !unhealthy.is_empty() {
            return (unhealthy, true);
        }
        match failover {
            MetadataFailover::None => (Vec::new(), false),
            MetadataFailover::All => {
                let (healthy, unhealthy) = Self::split_by_health(candidates, unfit, |_| true);
                if !healthy.is_empty() {
                    (healthy, false)
                } else if !unhealthy.is_empty() {
                    (unhealthy, true)
                } else {
                    (Vec::new(), false)
                }
            }
            MetadataFailover::NotKey => {
                let (healthy, unhealthy) = Self::split_by_health(candidates, unfit, |instance| {
                    metadata_match_not_key(wanted, instance.metadata())
                });
                if !healthy.is_empty() {
                    (healthy, false)
                } else if !unhealthy.is_empty() {
                    (unhealthy, true)
                } else {
                    (Vec::new(), false)
                }
            }
        }
    }
}

impl RouteFilter for MetadataFilter {
    fn name(&self) -> &'static str {
        "metadataRouter"
    }

    fn bit(&self) -> u8 {
        router_bit::METADATA
    }

    fn filter(&self, route_info: &mut RouteInfo) -> ApiResult<()> {
        let instances = route_info.service_instances().ok_or(ApiError::InvalidState)?;
        let service_key = instances.service_data().service_key().clone();

        let (wanted, failover) = match route_info.metadata_param() {
            Some(param) if !param.metadata.is_empty() => {
                (param.metadata.clone(), param.failover)
            }
            _ => (BTreeMap::new(), MetadataFailover::None),
        };

        let key = MetadataCacheKey {
            prior: instances.available().ptr_id(),
            circuit_version: instances.service().circuit_breaker_version(),
            metadata: join_map(&wanted),
            failover: failover.as_str(),
        };

        let value = match self.cache.get(&key) {
            Some(value) => value,
            None => {
                let prior = Arc::clone(instances.available());
                let unfit = unfit_instance_ids(route_info, instances);
                let (result, recover_all) =
                    Self::calculate(prior.instances(), &unfit, &wanted, failover);
                let current = if recover_all {
                    Arc::new(InstancesSet::with_recover_info(
                        result,
                        wanted.clone(),
                        "metadata router".to_string(),
                    ))
                } else {
                    Arc::new(InstancesSet::with_subset(result, wanted.clone()))
                };
                report_recover_edge(
                    &self.monitor,
                    &service_key,
                    &prior,
                    recover_all,
                    "metadata router",
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

        if !wanted.is_empty() {
            value.current.record_hit();
        }
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
