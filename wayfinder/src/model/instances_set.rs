use crate::model::{Instance, Service, ServiceData};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// An ordered slice of instances borrowed from one published snapshot, plus
/// the subset labels recorded by the filter that produced it.
///
/// Every filter stage produces a new set referencing the same backing
/// [`ServiceData`]; pointer identity of the `Arc` is therefore a stable cache
/// key while any cache entry pins it.
#[derive(Debug)]
pub struct InstancesSet {
    instances: Vec<Arc<Instance>>,
    subset: BTreeMap<String, String>,
    recover_info: String,
    recover_all: AtomicBool,
    hits: AtomicU64,
}

impl InstancesSet {
    pub fn new(instances: Vec<Arc<Instance>>) -> Self {
        Self::with_subset(instances, BTreeMap::new())
    }

    pub fn with_subset(instances: Vec<Arc<Instance>>, subset: BTreeMap<String, String>) -> Self {
        Self::with_recover_info(instances, subset, String::new())
    }

    /// A non-empty `recover_info` marks a set produced by degrading past
    /// policy; such a set starts with its recover-all flag raised.
    pub fn with_recover_info(
        instances: Vec<Arc<Instance>>,
        subset: BTreeMap<String, String>,
        recover_info: String,
    ) -> Self {
        Self {
            recover_all: AtomicBool::new(!recover_info.is_empty()),
            instances,
            subset,
            recover_info,
            hits: AtomicU64::new(0),
        }
    }

    pub fn instances(&self) -> &[Arc<Instance>] {
        &self.instances
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn subset(&self) -> &BTreeMap<String, String> {
        &self.subset
    }

    pub fn recover_info(&self) -> &str {
        &self.recover_info
    }

    /// Stable identity used as a cache-key component.
    pub fn ptr_id(self: &Arc<Self>) -> usize {
        Arc::as_ptr(self) as usize
    }

    pub fn recover_all(&self) -> bool {
        self.recover_all.load(Ordering::Acquire)
    }

    /// One winner per edge: used to report recover-all start/stop exactly
    /// once per transition.
    pub fn swap_recover_all(&self, from: bool, to: bool) -> bool {
        self.recover_all
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn take_hits(&self) -> u64 {
        self.hits.swap(0, Ordering::Relaxed)
    }
}

/// The mutable per-call handle threading an [`InstancesSet`] through the
/// route-filter pipeline.
#[derive(Debug, Clone)]
pub struct ServiceInstances {
    service: Arc<Service>,
    data: Arc<ServiceData>,
    available: Arc<InstancesSet>,
}

impl ServiceInstances {
    pub fn new(data: Arc<ServiceData>, service: Arc<Service>) -> Option<Self> {
        let available = data.instances()?.full_set();
        Some(Self {
            service,
            data,
            available,
        })
    }

    pub fn service(&self) -> &Arc<Service> {
        &self.service
    }

    pub fn service_data(&self) -> &Arc<ServiceData> {
        &self.data
    }

    pub fn service_metadata(&self) -> &BTreeMap<String, String> {
        static EMPTY: BTreeMap<String, String> = BTreeMap::new();
        self.data
            .instances()
            .map(|d| &d.service_metadata)
            .unwrap_or(&EMPTY)
    }

    pub fn is_nearby_enabled(&self) -> bool {
        self.data.instances().is_some_and(|d| d.nearby_enabled)
    }

    pub fn is_canary_enabled(&self) -> bool {
        self.data.instances().is_some_and(|d| d.canary_enabled)
    }

    pub fn available(&self) -> &Arc<InstancesSet> {
        &self.available
    }

    /// Replaces the available set with a filter's output.
    pub fn update_available(&mut self, set: Arc<InstancesSet>) {
        self.available = set;
    }

    /// Ids of instances currently holding a half-open probe budget.
    pub fn half_open_ids(&self) -> HashSet<String> {
        self.service.half_open_instances()
    }
}
