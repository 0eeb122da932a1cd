use crate::balance::{Criteria, LoadBalancer};
use crate::conf;
use crate::error::{ApiError, ApiResult};
use crate::model::{Instance, InstancesSet, ServiceData, ServiceInstances};
use crate::route::{ClearableCache, FilterCache};
use rand::Rng;
use std::sync::Arc;

#[derive(Debug)]
struct WeightTable {
    _data: Arc<ServiceData>,
    set: Arc<InstancesSet>,
    /// Cumulative dynamic weights, aligned with the set's instance order.
    cumulative: Vec<u64>,
    total: u64,
}

/// Random pick proportional to each instance's dynamic weight.
pub struct WeightedRandomBalancer {
    // Rebuilt lazily when the candidate set or the dynamic weights move.
    cache: Arc<FilterCache<(usize, u64), WeightTable>>,
}

impl Default for WeightedRandomBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl WeightedRandomBalancer {
    pub fn new() -> Self {
        Self {
            cache: Arc::new(FilterCache::new()),
        }
    }

    fn table(&self, instances: &ServiceInstances) -> Arc<WeightTable> {
        let set = instances.available();
        let key = (set.ptr_id(), instances.service().dynamic_weight_version());
        if let Some(table) = self.cache.get(&key) {
            return table;
        }
        let mut cumulative = Vec::with_capacity(set.len());
        let mut total = 0u64;
        for instance in set.instances() {
            total += instance.dynamic_weight() as u64;
            cumulative.push(total);
        }
        let table = Arc::new(WeightTable {
            _data: Arc::clone(instances.service_data()),
            set: Arc::clone(set),
            cumulative,
            total,
        });
        self.cache.put(key, Arc::clone(&table));
        table
    }
}

impl LoadBalancer for WeightedRandomBalancer {
    fn kind(&self) -> &'static str {
        conf::LB_WEIGHTED_RANDOM
    }

    fn choose(
        &self,
        instances: &ServiceInstances,
        _criteria: &Criteria,
    ) -> ApiResult<Arc<Instance>> {
        let table = self.table(instances);
        if table.set.is_empty() {
            return Err(ApiError::InstanceNotFound);
        }
        let index = if table.total == 0 {
            // All weights ramped to zero: fall back to a uniform pick.
            rand::rng().random_range(0..table.set.len())
        } else {
            let point = rand::rng().random_range(0..table.total);
            table.cumulative.partition_point(|&cum| cum <= point)
        };
        table
            .set
            .instances()
            .get(index)
            .cloned()
            .ok_or(ApiError::InstanceNotFound)
    }

    fn clearable(&self) -> Option<Arc<dyn ClearableCache>> {
        Some(Arc::clone(&self.cache) as _)
    }
}
