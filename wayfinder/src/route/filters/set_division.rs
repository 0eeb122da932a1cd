use crate::error::{ApiError, ApiResult};
use crate::model::{Instance, InstancesSet, ServiceData, constants};
use crate::route::filters::RouteFilter;
use crate::route::{
    ClearableCache, FilterCache, RouteInfo, router_bit, unfit_instance_ids,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::error;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SetDivisionCacheKey {
    prior: usize,
    caller_set_name: String,
    circuit_version: u64,
    flags: u8,
}

#[derive(Debug)]
struct SetDivisionCacheValue {
    _instances_data: Arc<ServiceData>,
    _prior: Arc<InstancesSet>,
    current: Arc<InstancesSet>,
    enable_set: bool,
}

/// taf-style set routing: matches the caller's `name.area.group` set name
/// against callee set names (with a `*` wildcard in the last segment) and,
/// when active, switches the nearby filter off for the rest of the call.
pub struct SetDivisionFilter {
    cache: Arc<FilterCache<SetDivisionCacheKey, SetDivisionCacheValue>>,
}

impl Default for SetDivisionFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl SetDivisionFilter {
    pub fn new() -> Self {
        Self {
            cache: Arc::new(FilterCache::new()),
        }
    }

    /// Set routing engages only when the caller carries a well-formed set
    /// name, the callee opted in, and the first set-name segments agree.
    fn is_enabled_for(caller_set_name: &str, instance: &Instance) -> bool {
        let Some(callee_set_name) = instance.set_name() else {
            return false;
        };
        if !instance.set_enabled() {
            return false;
        }
        let Some(caller_first) = caller_set_name.split('.').next() else {
            return false;
        };
        callee_set_name.split('.').next() == Some(caller_first)
    }

    fn matches_with_name(
        set_name: &str,
        candidates: &[Arc<Instance>],
        wild: bool,
    ) -> Vec<Arc<Instance>> {
        candidates
            .iter()
            .filter(|instance| {
                if !instance.set_enabled() {
                    return false;
                }
                match instance.set_name() {
                    None => false,
                    Some(callee) if wild => callee.starts_with(set_name),
                    Some(callee) => callee == set_name,
                }
            })
            .cloned()
            .collect()
    }

    fn calculate_match(
        caller_set_name: &str,
        candidates: &[Arc<Instance>],
    ) -> Option<Vec<Arc<Instance>>> {
        let first = caller_set_name.find('.')?;
        let last = caller_set_name.rfind('.')?;
        if first == last {
            error!(caller_set_name, "set name format invalid");
            return None;
        }
        let name_and_area = &caller_set_name[..last];
        let group = &caller_set_name[last + 1..];

        if group == "*" {
            Some(Self::matches_with_name(name_and_area, candidates, true))
        } else {
            let mut result = Self::matches_with_name(caller_set_name, candidates, false);
            if result.is_empty() {
                result = Self::matches_with_name(&format!("{name_and_area}.*"), candidates, false);
            }
            Some(result)
        }
    }
}

impl RouteFilter for SetDivisionFilter {
    fn name(&self) -> &'static str {
        "setDivisionRouter"
    }

    fn bit(&self) -> u8 {
        router_bit::SET_DIVISION
    }

    fn filter(&self, route_info: &mut RouteInfo) -> ApiResult<()> {
        let Some(source) = route_info.source() else {
            return Ok(());
        };
        let caller_set_name = match source.metadata.get(constants::SET_NAME_KEY) {
            Some(name) if !name.is_empty() => name.clone(),
            _ => return Ok(()),
        };
        let enable_set_force = source
            .metadata
            .get(constants::ENABLE_SET_FORCE_KEY)
            .is_some_and(|v| v == "true");

        let instances = route_info.service_instances().ok_or(ApiError::InvalidState)?;
        let key = SetDivisionCacheKey {
            prior: instances.available().ptr_id(),
            caller_set_name: caller_set_name.clone(),
            circuit_version: instances.service().circuit_breaker_version(),
            flags: route_info.request_flags(),
        };

        let value = match self.cache.get(&key) {
            Some(value) => value,
            None => {
                let prior = Arc::clone(instances.available());
                let enable_set = prior
                    .instances()
                    .iter()
                    .any(|instance| Self::is_enabled_for(&caller_set_name, instance));

                let current = if enable_set {
                    let matched = Self::calculate_match(&caller_set_name, prior.instances())
                        .unwrap_or_default();
                    let unfit = unfit_instance_ids(route_info, instances);
                    let healthy: Vec<Arc<Instance>> = matched
                        .iter()
                        .filter(|instance| !unfit.contains(instance.id()))
                        .cloned()
                        .collect();
                    let mut subset = BTreeMap::new();
                    if healthy.is_empty() {
                        // Everything in the set is down: hand back the whole
                        // matched set rather than nothing.
                        subset.insert("taf.set".to_string(), "*".to_string());
                        Arc::new(InstancesSet::with_recover_info(
                            matched,
                            subset,
                            "no healthy node".to_string(),
                        ))
                    } else {
                        subset.insert("taf.set".to_string(), caller_set_name.clone());
                        Arc::new(InstancesSet::with_subset(healthy, subset))
                    }
                } else {
                    Arc::new(InstancesSet::new(Vec::new()))
                };

                let value = Arc::new(SetDivisionCacheValue {
                    _instances_data: Arc::clone(instances.service_data()),
                    _prior: prior,
                    current,
                    enable_set,
                });
                self.cache.put(key, Arc::clone(&value));
                value
            }
        };

        if !enable_set_force && !value.enable_set {
            // Set routing not engaged: pass the candidates through.
            return Ok(());
        }

        // The toggle applies on cache hits too: set routing always shuts the
        // nearby filter off for the remainder of this call.
        route_info.set_router_enabled(router_bit::NEARBY, false);
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
