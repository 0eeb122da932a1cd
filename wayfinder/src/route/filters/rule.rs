use crate::error::{ApiError, ApiResult};
use crate::model::{Instance, InstancesSet, RouteRule, ServiceData, ServiceKey};
use crate::monitor::MonitorSink;
use crate::route::filters::{RouteFilter, report_recover_edge};
use crate::route::{
    ClearableCache, FilterCache, RouteInfo, join_map, router_bit, unfit_instance_ids,
};
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RuleCacheKey {
    prior: usize,
    circuit_version: u64,
    flags: u8,
    labels: String,
    /// Source metadata digest: rule matching depends on it.
    parameters: String,
}

#[derive(Debug)]
struct RuleCacheValue {
    /// Pins the backing snapshots for the entry's lifetime.
    _instances_data: Arc<ServiceData>,
    _route_data: Option<Arc<ServiceData>>,
    _prior: Arc<InstancesSet>,
    /// Weighted subsets of the chosen priority group: (cumulative weight,
    /// subset).
    subsets: Vec<(u32, Arc<InstancesSet>)>,
    total_weight: u32,
}

/// Matches source/destination labels against the callee's inbound rules
/// (falling back to the caller's outbound rules) and narrows the candidate
/// set to one weighted destination subset.
pub struct RuleFilter {
    enable_recover_all: bool,
    monitor: Arc<dyn MonitorSink>,
    cache: Arc<FilterCache<RuleCacheKey, RuleCacheValue>>,
}

impl RuleFilter {
    pub fn new(enable_recover_all: bool, monitor: Arc<dyn MonitorSink>) -> Self {
        Self {
            enable_recover_all,
            monitor,
            cache: Arc::new(FilterCache::new()),
        }
    }

    fn pick_rules<'a>(route_info: &'a RouteInfo) -> Option<&'a [RouteRule]> {
        if let Some(data) = route_info.route_rule()
            && let Some(rules) = data.route_rule()
            && !rules.inbounds.is_empty()
        {
            return Some(&rules.inbounds);
        }
        if let Some(data) = route_info.source_route_rule()
            && let Some(rules) = data.route_rule()
            && !rules.outbounds.is_empty()
        {
            return Some(&rules.outbounds);
        }
        None
    }

    fn compute(
        &self,
        route_info: &RouteInfo,
        rules: &[RouteRule],
        service_key: &ServiceKey,
    ) -> ApiResult<RuleCacheValue> {
        let instances = route_info.service_instances().ok_or(ApiError::InvalidState)?;
        let prior = Arc::clone(instances.available());
        let unfit = unfit_instance_ids(route_info, instances);

        let empty = BTreeMap::new();
        let (caller_key, caller_metadata) = match route_info.source() {
            Some(source) => (source.service.as_ref(), &source.metadata),
            None => (None, &empty),
        };

        let rule = rules
            .iter()
            .find(|rule| rule.matches_source(caller_key, caller_metadata))
            .ok_or(ApiError::RouteRuleNotMatch)?;

        // Collect per-destination matches, grouped by priority; lower wins.
        let mut groups: BTreeMap<u32, Vec<(u32, BTreeMap<String, String>, Vec<Arc<Instance>>, Vec<Arc<Instance>>)>> =
            BTreeMap::new();
        for destination in &rule.destinations {
            if destination.isolate {
                continue;
            }
            let matched: Vec<Arc<Instance>> = prior
                .instances()
                .iter()
                .filter(|instance| destination.selects(instance.metadata()))
                .cloned()
                .collect();
            if matched.is_empty() {
                continue;
            }
            let healthy: Vec<Arc<Instance>> = matched
                .iter()
                .filter(|instance| !unfit.contains(instance.id()))
                .cloned()
                .collect();
            groups.entry(destination.priority).or_default().push((
                destination.weight,
                destination.metadata.clone(),
                healthy,
                matched,
            ));
        }

        let (_, group) = groups.into_iter().next().ok_or(ApiError::RouteRuleNotMatch)?;

        let mut subsets = Vec::new();
        let mut total_weight = 0u32;
        let mut recover_all = false;
        for (weight, labels, healthy, matched) in group {
            let (members, degraded) = if !healthy.is_empty() {
                (healthy, false)
            } else if self.enable_recover_all {
                (matched, true)
            } else {
                continue;
            };
            recover_all |= degraded;
            let recover_info = degraded.then(|| "rule router".to_string()).unwrap_or_default();
            let subset = Arc::new(InstancesSet::with_recover_info(members, labels, recover_info));
            total_weight += weight.max(1);
            subsets.push((total_weight, subset));
        }
        if subsets.is_empty() {
            return Err(ApiError::RouteRuleNotMatch);
        }

        report_recover_edge(&self.monitor, service_key, &prior, recover_all, "rule router");

        Ok(RuleCacheValue {
            _instances_data: Arc::clone(instances.service_data()),
            _route_data: route_info.route_rule().or(route_info.source_route_rule()).cloned(),
            _prior: prior,
            subsets,
            total_weight,
        })
    }
}

impl RouteFilter for RuleFilter {
    fn name(&self) -> &'static str {
        "ruleBasedRouter"
    }

    fn bit(&self) -> u8 {
        router_bit::RULE
    }

    fn filter(&self, route_info: &mut RouteInfo) -> ApiResult<()> {
        let Some(rules) = Self::pick_rules(route_info) else {
            // No rules for either side: pass through unchanged.
            return Ok(());
        };
        let rules = rules.to_vec();

        let instances = route_info.service_instances().ok_or(ApiError::InvalidState)?;
        let service_key = instances.service_data().service_key().clone();
        let key = RuleCacheKey {
            prior: instances.available().ptr_id(),
            circuit_version: instances.service().circuit_breaker_version(),
            flags: route_info.request_flags(),
            labels: join_map(route_info.labels()),
            parameters: route_info
                .source()
                .map(|source| join_map(&source.metadata))
                .unwrap_or_default(),
        };

        let value = match self.cache.get(&key) {
            Some(value) => value,
            None => {
                let value = Arc::new(self.compute(route_info, &rules, &service_key)?);
                self.cache.put(key, Arc::clone(&value));
                value
            }
        };

        // The weighted pick runs on every pass, cache hit or not.
        let chosen = if value.subsets.len() == 1 {
            Arc::clone(&value.subsets[0].1)
        } else {
            let point = rand::rng().random_range(0..value.total_weight);
            let index = value
                .subsets
                .partition_point(|(cumulative, _)| *cumulative <= point);
            Arc::clone(&value.subsets[index.min(value.subsets.len() - 1)].1)
        };
        chosen.record_hit();
        route_info
            .service_instances_mut()
            .ok_or(ApiError::InvalidState)?
            .update_available(chosen);
        Ok(())
    }

    fn clearable(&self) -> Arc<dyn ClearableCache> {
        Arc::clone(&self.cache) as _
    }
}
