use crate::balance::{Criteria, LoadBalancer};
use crate::conf;
use crate::error::{ApiError, ApiResult};
use crate::model::{Instance, ServiceInstances};
use dashmap::DashMap;
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Starting latency estimate until real feedback arrives, µs.
const INITIAL_LATENCY_US: u64 = 1_000;
/// EWMA smoothing: new = (old * 7 + sample) / 8.
const EWMA_SHIFT: u64 = 3;

/// Picks instances proportionally to `dynamic_weight / latency`, where the
/// latency estimate is an EWMA fed by call-result reports.
pub struct LocalityAwareBalancer {
    latency_us: DashMap<String, AtomicU64>,
}

impl Default for LocalityAwareBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalityAwareBalancer {
    pub fn new() -> Self {
        Self {
            latency_us: DashMap::new(),
        }
    }

    fn latency_of(&self, instance_id: &str) -> u64 {
        self.latency_us
            .get(instance_id)
            .map(|entry| entry.load(Ordering::Relaxed))
            .unwrap_or(INITIAL_LATENCY_US)
            .max(1)
    }

    fn score(&self, instance: &Instance) -> u64 {
        // Scaled so sub-millisecond latencies still differentiate.
        (instance.dynamic_weight() as u64 * 1_000_000) / self.latency_of(instance.id())
    }
}

impl LoadBalancer for LocalityAwareBalancer {
    fn kind(&self) -> &'static str {
        conf::LB_LOCALITY_AWARE
    }

    fn choose(
        &self,
        instances: &ServiceInstances,
        _criteria: &Criteria,
    ) -> ApiResult<Arc<Instance>> {
        let set = instances.available();
        if set.is_empty() {
            return Err(ApiError::InstanceNotFound);
        }
        let scores: Vec<u64> = set.instances().iter().map(|i| self.score(i)).collect();
        let total: u64 = scores.iter().sum();
        if total == 0 {
            return set
                .instances()
                .first()
                .cloned()
                .ok_or(ApiError::InstanceNotFound);
        }
        let mut point = rand::rng().random_range(0..total);
        for (index, score) in scores.iter().enumerate() {
            if point < *score {
                let chosen = Arc::clone(&set.instances()[index]);
                // Tag the pick so call results can be correlated back.
                chosen.set_locality_tag(index as u64 + 1);
                return Ok(chosen);
            }
            point -= score;
        }
        set.instances()
            .last()
            .cloned()
            .ok_or(ApiError::InstanceNotFound)
    }

    fn feedback(&self, instance_id: &str, latency_us: u64) {
        match self.latency_us.get(instance_id) {
            Some(entry) => {
                let old = entry.load(Ordering::Relaxed);
                let new = (old * ((1 << EWMA_SHIFT) - 1) + latency_us) >> EWMA_SHIFT;
                entry.store(new.max(1), Ordering::Relaxed);
            }
            None => {
                self.latency_us
                    .insert(instance_id.to_string(), AtomicU64::new(latency_us.max(1)));
            }
        }
    }
}
