use crate::cache::ReadMostlyMap;
use crate::model::{InstancesSet, ServiceData};
use std::hash::Hash;
use std::sync::Arc;

/// A cache the background sweeper can trim by idle time.
pub trait ClearableCache: Send + Sync {
    fn clear_idle(&self, idle_before: u64);
}

/// Memoised filter output. Holding the input set and the backing snapshot
/// keeps the cache key's pointer identity stable and the instances alive
/// for the entry's lifetime.
#[derive(Debug)]
pub struct SubsetCacheValue {
    pub instances_data: Arc<ServiceData>,
    pub prior: Arc<InstancesSet>,
    pub current: Arc<InstancesSet>,
}

/// Per-filter memo built on the read-mostly map, so cache hits stay on the
/// lock-free path.
#[derive(Debug)]
pub struct FilterCache<K, V>
where
    K: Eq + Hash + Clone,
{
    map: ReadMostlyMap<K, V>,
}

impl<K, V> Default for FilterCache<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> FilterCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            map: ReadMostlyMap::new(),
        }
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.map.get(key)
    }

    pub fn put(&self, key: K, value: Arc<V>) {
        self.map.update(key, value);
    }

    pub fn values(&self) -> Vec<Arc<V>> {
        self.map.values()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl<K, V> ClearableCache for FilterCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Send + Sync,
{
    fn clear_idle(&self, idle_before: u64) {
        let expired = self.map.collect_expired(idle_before);
        self.map.delete(&expired);
        self.map.sweep(idle_before);
    }
}
