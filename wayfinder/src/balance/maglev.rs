use crate::balance::{Criteria, LoadBalancer, hash_one};
use crate::conf;
use crate::error::{ApiError, ApiResult};
use crate::model::{Instance, InstancesSet, ServiceData, ServiceInstances};
use crate::route::{ClearableCache, FilterCache};
use ahash::RandomState;
use std::sync::Arc;

/// Prime lookup-table size, per the maglev paper's guidance that it far
/// exceed the maximum backend count.
const TABLE_SIZE: u64 = 65_537;

#[derive(Debug)]
struct Table {
    _data: Arc<ServiceData>,
    set: Arc<InstancesSet>,
    slots: Vec<u32>,
}

/// Maglev consistent hashing: each instance fills lookup-table slots along
/// its own permutation until the table is complete.
pub struct MaglevBalancer {
    hasher: RandomState,
    cache: Arc<FilterCache<(usize, u64), Table>>,
}

impl MaglevBalancer {
    pub fn new(hasher: RandomState) -> Self {
        Self {
            hasher,
            cache: Arc::new(FilterCache::new()),
        }
    }

    fn build_slots(&self, set: &InstancesSet) -> Vec<u32> {
        let candidates = set.instances();
        let mut offsets = Vec::with_capacity(candidates.len());
        let mut skips = Vec::with_capacity(candidates.len());
        for instance in candidates {
            let offset = hash_one(&self.hasher, &(instance.id(), 0u8)) % TABLE_SIZE;
            let skip = hash_one(&self.hasher, &(instance.id(), 1u8)) % (TABLE_SIZE - 1) + 1;
            offsets.push(offset);
            skips.push(skip);
        }
        let mut next = vec![0u64; candidates.len()];
        let mut slots = vec![u32::MAX; TABLE_SIZE as usize];
        let mut filled = 0u64;
        while filled < TABLE_SIZE {
            for index in 0..candidates.len() {
                let mut slot = (offsets[index] + next[index] * skips[index]) % TABLE_SIZE;
                while slots[slot as usize] != u32::MAX {
                    next[index] += 1;
                    slot = (offsets[index] + next[index] * skips[index]) % TABLE_SIZE;
                }
                slots[slot as usize] = index as u32;
                next[index] += 1;
                filled += 1;
                if filled == TABLE_SIZE {
                    break;
                }
            }
        }
        slots
    }

    fn table(&self, instances: &ServiceInstances) -> Arc<Table> {
        let set = instances.available();
        let key = (set.ptr_id(), instances.service().dynamic_weight_version());
        if let Some(table) = self.cache.get(&key) {
            return table;
        }
        let slots = if set.is_empty() {
            Vec::new()
        } else {
            self.build_slots(set)
        };
        let table = Arc::new(Table {
            _data: Arc::clone(instances.service_data()),
            set: Arc::clone(set),
            slots,
        });
        self.cache.put(key, Arc::clone(&table));
        table
    }
}

impl LoadBalancer for MaglevBalancer {
    fn kind(&self) -> &'static str {
        conf::LB_MAGLEV
    }

    fn choose(
        &self,
        instances: &ServiceInstances,
        criteria: &Criteria,
    ) -> ApiResult<Arc<Instance>> {
        let table = self.table(instances);
        if table.set.is_empty() || table.slots.is_empty() {
            return Err(ApiError::InstanceNotFound);
        }
        let hash = criteria.hash_value(&self.hasher);
        let index = table.slots[(hash % TABLE_SIZE) as usize] as usize;
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
