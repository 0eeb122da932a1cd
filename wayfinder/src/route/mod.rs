mod cache;
mod chain;
mod filters;
mod info;

pub use cache::*;
pub use chain::*;
pub use filters::*;
pub use info::*;

#[cfg(test)]
mod tests;

use crate::model::ServiceInstances;
use std::collections::HashSet;

pub const DEFAULT_RULE_PRIORITY: u32 = 9;
pub const DEFAULT_RULE_WEIGHT: u32 = 0;

/// Instances no filter should hand out as primary candidates: unhealthy ones
/// (unless the request keeps them), circuit-open ones (unless the request
/// keeps them), and always the half-open ones, which are only reachable
/// through the balancer's probe-budget path.
pub fn unfit_instance_ids(route_info: &RouteInfo, instances: &ServiceInstances) -> HashSet<String> {
    let service = instances.service();
    let mut unfit = service.half_open_instances();
    if !route_info.include_circuit_open() {
        unfit.extend(service.open_instances());
    }
    if !route_info.include_unhealthy() {
        for instance in instances.available().instances() {
            if !instance.is_healthy() {
                unfit.insert(instance.id().to_string());
            }
        }
    }
    unfit
}

pub(crate) fn join_map(map: &std::collections::BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (key, value) in map {
        if !out.is_empty() {
            out.push('&');
        }
        out.push_str(key);
        out.push('=');
        out.push_str(value);
    }
    out
}
