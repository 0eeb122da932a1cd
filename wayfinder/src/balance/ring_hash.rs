use crate::balance::{Criteria, LoadBalancer, hash_one};
use crate::error::{ApiError, ApiResult};
use crate::model::{Instance, InstancesSet, ServiceData, ServiceInstances};
use crate::route::{ClearableCache, FilterCache};
use ahash::RandomState;
use std::sync::Arc;

#[derive(Debug)]
struct Ring {
    _data: Arc<ServiceData>,
    set: Arc<InstancesSet>,
    /// (point, instance index), sorted by point.
    points: Vec<(u64, usize)>,
}

impl Ring {
    /// First ring slot at or after `hash`, wrapping.
    fn locate(&self, hash: u64) -> usize {
        let index = self.points.partition_point(|(point, _)| *point < hash);
        if index == self.points.len() { 0 } else { index }
    }

    /// The primary owner for `hash`, or its `replicate_index`-th distinct
    /// successor on the ring.
    fn pick(&self, hash: u64, replicate_index: u32) -> Option<usize> {
        if self.points.is_empty() {
            return None;
        }
        let start = self.locate(hash);
        let primary = self.points[start].1;
        if replicate_index == 0 {
            return Some(primary);
        }
        let mut seen = vec![primary];
        let mut cursor = start;
        for _ in 0..self.points.len() {
            cursor = (cursor + 1) % self.points.len();
            let candidate = self.points[cursor].1;
            if seen.contains(&candidate) {
                continue;
            }
            seen.push(candidate);
            if seen.len() as u32 == replicate_index + 1 {
                return Some(candidate);
            }
        }
        None
    }
}

/// Consistent hashing over a ring of weighted virtual nodes. Neighbour
/// selection via `replicate_index` backs the backup-instance path.
pub struct RingHashBalancer {
    kind: &'static str,
    vnode_count: u32,
    hasher: RandomState,
    cache: Arc<FilterCache<(usize, u64), Ring>>,
}

impl RingHashBalancer {
    pub fn new(kind: &'static str, vnode_count: u32, hasher: RandomState) -> Self {
        Self {
            kind,
            vnode_count,
            hasher,
            cache: Arc::new(FilterCache::new()),
        }
    }

    fn ring(&self, instances: &ServiceInstances) -> Arc<Ring> {
        let set = instances.available();
        let key = (set.ptr_id(), instances.service().dynamic_weight_version());
        if let Some(ring) = self.cache.get(&key) {
            return ring;
        }
        let mut points = Vec::new();
        for (index, instance) in set.instances().iter().enumerate() {
            // Virtual-node share scales with the dynamic weight.
            let vnodes =
                ((self.vnode_count as u64 * instance.dynamic_weight() as u64) / 100).max(1);
            for replica in 0..vnodes {
                let point = hash_one(&self.hasher, &(instance.id(), replica));
                points.push((point, index));
            }
        }
        points.sort_unstable();
        let ring = Arc::new(Ring {
            _data: Arc::clone(instances.service_data()),
            set: Arc::clone(set),
            points,
        });
        self.cache.put(key, Arc::clone(&ring));
        ring
    }
}

impl LoadBalancer for RingHashBalancer {
    fn kind(&self) -> &'static str {
        self.kind
    }

    fn choose(
        &self,
        instances: &ServiceInstances,
        criteria: &Criteria,
    ) -> ApiResult<Arc<Instance>> {
        let ring = self.ring(instances);
        if ring.set.is_empty() {
            return Err(ApiError::InstanceNotFound);
        }
        let hash = criteria.hash_value(&self.hasher);
        let index = ring
            .pick(hash, criteria.replicate_index)
            .ok_or(ApiError::InstanceNotFound)?;
        ring.set
            .instances()
            .get(index)
            .cloned()
            .ok_or(ApiError::InstanceNotFound)
    }

    fn is_ring_family(&self) -> bool {
        true
    }

    fn clearable(&self) -> Option<Arc<dyn ClearableCache>> {
        Some(Arc::clone(&self.cache) as _)
    }
}
