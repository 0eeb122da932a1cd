mod locality_aware;
mod maglev;
mod ring_hash;
mod weighted_random;

pub use locality_aware::*;
pub use maglev::*;
pub use ring_hash::*;
pub use weighted_random::*;

#[cfg(test)]
mod tests;

use crate::conf::{self, LoadBalancerConfig};
use crate::error::{ApiError, ApiResult};
use crate::model::{Instance, ServiceInstances};
use crate::route::ClearableCache;
use ahash::RandomState;
use std::hash::Hash;
use std::sync::Arc;

/// Inputs steering one balancing decision.
#[derive(Debug, Clone, Default)]
pub struct Criteria {
    /// Explicit hash key; wins over `hash_string` when non-zero.
    pub hash_key: u64,
    pub hash_string: String,
    /// For consistent-hash balancers, `i ≥ 1` asks for the i-th distinct
    /// ring neighbour of the primary pick. Others ignore it.
    pub replicate_index: u32,
    /// Suppresses the half-open probe path (used by backup selection).
    pub ignore_half_open: bool,
}

impl Criteria {
    pub fn hash_value(&self, hasher: &RandomState) -> u64 {
        if self.hash_key != 0 {
            self.hash_key
        } else {
            hash_one(hasher, &self.hash_string)
        }
    }
}

/// Deterministic, fast hash for balancing decisions. Fixed seeds keep picks
/// stable across restarts and processes; not security-sensitive.
pub fn routing_hasher(hash_func: &str) -> RandomState {
    match hash_func {
        "crc32" => RandomState::with_seeds(11, 12, 13, 14),
        _ => RandomState::with_seeds(1, 2, 3, 4),
    }
}

pub fn hash_one<T: Hash>(hasher: &RandomState, value: &T) -> u64 {
    hasher.hash_one(value)
}

/// Pluggable instance picker. Must return `InstanceNotFound` when no
/// candidate remains.
pub trait LoadBalancer: Send + Sync {
    fn kind(&self) -> &'static str;

    fn choose(&self, instances: &ServiceInstances, criteria: &Criteria)
    -> ApiResult<Arc<Instance>>;

    /// True for the ring family, whose backup selection walks distinct ring
    /// neighbours instead of scanning.
    fn is_ring_family(&self) -> bool {
        false
    }

    /// Call-result feedback; only the locality-aware balancer listens.
    fn feedback(&self, _instance_id: &str, _latency_us: u64) {}

    /// The balancer's rebuild cache, if it keeps one, for the sweeper.
    fn clearable(&self) -> Option<Arc<dyn ClearableCache>> {
        None
    }
}

impl std::fmt::Debug for dyn LoadBalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadBalancer").field("kind", &self.kind()).finish()
    }
}

/// Factory keyed by the configuration string.
pub fn create_balancer(
    kind: &str,
    config: &LoadBalancerConfig,
) -> ApiResult<Arc<dyn LoadBalancer>> {
    match kind {
        conf::LB_WEIGHTED_RANDOM => Ok(Arc::new(WeightedRandomBalancer::new())),
        conf::LB_RING_HASH => Ok(Arc::new(RingHashBalancer::new(
            conf::LB_RING_HASH,
            config.vnode_count,
            routing_hasher(&config.hash_func),
        ))),
        conf::LB_L5_CST_HASH => Ok(Arc::new(RingHashBalancer::new(
            conf::LB_L5_CST_HASH,
            config.vnode_count,
            routing_hasher("crc32"),
        ))),
        conf::LB_C_MURMUR_HASH => Ok(Arc::new(RingHashBalancer::new(
            conf::LB_C_MURMUR_HASH,
            config.vnode_count,
            routing_hasher("murmur3"),
        ))),
        conf::LB_MAGLEV => Ok(Arc::new(MaglevBalancer::new(routing_hasher(
            &config.hash_func,
        )))),
        conf::LB_LOCALITY_AWARE => Ok(Arc::new(LocalityAwareBalancer::new())),
        _ => Err(ApiError::PluginError),
    }
}

/// Grants at most one probe slot per round to a half-open instance present
/// in the candidate superset.
pub fn try_half_open_probe(instances: &ServiceInstances) -> Option<Arc<Instance>> {
    let service = instances.service();
    let half_open = service.half_open_instances();
    if half_open.is_empty() {
        return None;
    }
    let by_id = instances.service_data().instances()?;
    for id in half_open {
        if let Some(instance) = by_id.by_id(&id)
            && service.try_half_open_probe(&id)
        {
            return Some(Arc::clone(instance));
        }
    }
    None
}
