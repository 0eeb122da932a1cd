use crate::cache::{PersistStore, ReadMostlyMap};
use crate::error::{ApiError, ApiResult};
use crate::model::{DataKind, DataStatus, Instance, Service, ServiceData, ServiceKey};
use crate::model::{CircuitBreakerUpdate, SetStatus};
use crate::monitor::MonitorSink;
use crate::registry::{DataFetcher, EventHandler, ServiceDataNotify};
use crate::sched::Executor;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Unused entries are torn down after this much idle time.
    pub service_expire_time: Duration,
    /// Default refresh interval handed to the fetcher on subscription.
    pub service_refresh_interval: Duration,
    /// Well-known system services with their own refresh intervals.
    pub system_intervals: Vec<(ServiceKey, Duration)>,
}

/// Invoked on the cache executor after a snapshot lands, so the service
/// context can swap its pointers and rebuild caches.
pub type DataChangeHook = Box<dyn Fn(Arc<ServiceData>) + Send + Sync>;
/// Invoked when a service's instance entry disappears, so the owning
/// context map can drop the service context.
pub type ServiceEvictHook = Box<dyn Fn(&ServiceKey) + Send + Sync>;

/// The local registry: one read-mostly map per data kind, the per-service
/// aggregates, and the notify table bridging fetcher pushes to waiters.
pub struct ServiceStore {
    config: StoreConfig,
    instances: ReadMostlyMap<ServiceKey, ServiceData>,
    route_rules: ReadMostlyMap<ServiceKey, ServiceData>,
    rate_limits: ReadMostlyMap<ServiceKey, ServiceData>,
    breaker_configs: ReadMostlyMap<ServiceKey, ServiceData>,
    services: Mutex<HashMap<ServiceKey, Arc<Service>>>,
    next_service_id: AtomicU64,
    notifies: Mutex<HashMap<(ServiceKey, DataKind), Arc<ServiceDataNotify>>>,
    fetcher: Arc<dyn DataFetcher>,
    persist: Arc<PersistStore>,
    cache_executor: Arc<Executor>,
    monitor: Arc<dyn MonitorSink>,
    change_hook: RwLock<Option<DataChangeHook>>,
    evict_hook: RwLock<Option<ServiceEvictHook>>,
}

impl std::fmt::Debug for ServiceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceStore")
            .field("config", &self.config)
            .finish()
    }
}

struct StoreHandler {
    store: Weak<ServiceStore>,
}

impl EventHandler for StoreHandler {
    fn on_update(&self, key: &ServiceKey, kind: DataKind, data: Option<Arc<ServiceData>>) {
        if let Some(store) = self.store.upgrade() {
            store.publish(key, kind, data);
        }
    }

    fn on_sync(&self, key: &ServiceKey, kind: DataKind) {
        if let Some(store) = self.store.upgrade() {
            let persist = Arc::clone(&store.persist);
            let key = key.clone();
            store
                .cache_executor
                .submit(move || persist.touch_sync_time(&key, kind));
        }
    }
}

impl ServiceStore {
    pub fn new(
        config: StoreConfig,
        fetcher: Arc<dyn DataFetcher>,
        persist: Arc<PersistStore>,
        cache_executor: Arc<Executor>,
        monitor: Arc<dyn MonitorSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            instances: ReadMostlyMap::new(),
            route_rules: ReadMostlyMap::new(),
            rate_limits: ReadMostlyMap::new(),
            breaker_configs: ReadMostlyMap::new(),
            services: Mutex::new(HashMap::new()),
            next_service_id: AtomicU64::new(0),
            notifies: Mutex::new(HashMap::new()),
            fetcher,
            persist,
            cache_executor,
            monitor,
            change_hook: RwLock::new(None),
            evict_hook: RwLock::new(None),
        })
    }

    pub fn set_change_hook(&self, hook: DataChangeHook) {
        *self.change_hook.write().unwrap() = Some(hook);
    }

    pub fn set_evict_hook(&self, hook: ServiceEvictHook) {
        *self.evict_hook.write().unwrap() = Some(hook);
    }

    fn map(&self, kind: DataKind) -> &ReadMostlyMap<ServiceKey, ServiceData> {
        match kind {
            DataKind::Instances => &self.instances,
            DataKind::RouteRule => &self.route_rules,
            DataKind::RateLimit => &self.rate_limits,
            DataKind::CircuitBreakerConfig => &self.breaker_configs,
        }
    }

    /// Readers must already be inside an epoch.
    pub fn get_service_data(&self, key: &ServiceKey, kind: DataKind) -> ApiResult<Arc<ServiceData>> {
        match self.map(kind).get(key) {
            None => Err(ApiError::ServiceNotFound),
            Some(data) if data.status() < DataStatus::Syncing => Err(ApiError::NotInit),
            Some(data) => Ok(data),
        }
    }

    /// Any cached snapshot regardless of status, without refreshing the
    /// entry's access time.
    pub fn peek_service_data(&self, key: &ServiceKey, kind: DataKind) -> Option<Arc<ServiceData>> {
        self.map(kind).peek(key)
    }

    pub fn service(&self, key: &ServiceKey) -> Option<Arc<Service>> {
        self.services.lock().unwrap().get(key).cloned()
    }

    fn get_or_create_service(&self, key: &ServiceKey) -> Arc<Service> {
        let mut services = self.services.lock().unwrap();
        Arc::clone(services.entry(key.clone()).or_insert_with(|| {
            let id = self.next_service_id.fetch_add(1, Ordering::Relaxed) + 1;
            Arc::new(Service::new(key.clone(), id))
        }))
    }

    fn refresh_interval_for(&self, key: &ServiceKey) -> Duration {
        self.config
            .system_intervals
            .iter()
            .find(|(system_key, _)| system_key == key)
            .map(|(_, interval)| *interval)
            .unwrap_or(self.config.service_refresh_interval)
    }

    /// Ensures a subscription exists for `(key, kind)` and returns the
    /// current snapshot (possibly disk-loaded) plus the notify object.
    pub fn load_or_subscribe(
        self: &Arc<Self>,
        key: &ServiceKey,
        kind: DataKind,
    ) -> (Option<Arc<ServiceData>>, Arc<ServiceDataNotify>) {
        let (notify, new_create) = {
            let mut notifies = self.notifies.lock().unwrap();
            match notifies.get(&(key.clone(), kind)) {
                Some(notify) => (Arc::clone(notify), false),
                None => {
                    let notify = Arc::new(ServiceDataNotify::new(key.clone(), kind));
                    notifies.insert((key.clone(), kind), Arc::clone(&notify));
                    (notify, true)
                }
            }
        };

        if new_create {
            // Disk snapshot first, so a caller tolerating stale data can
            // proceed before the control plane answers.
            if let Some(disk_data) = self.persist.load_service(key, kind) {
                self.publish(key, kind, Some(disk_data));
            }
            let handler = Arc::new(StoreHandler {
                store: Arc::downgrade(self),
            });
            self.fetcher
                .register(key, kind, self.refresh_interval_for(key), handler);
            info!(service = %key, %kind, "subscribed service data");
        }

        (self.map(kind).peek(key), notify)
    }

    /// Atomically replaces the mapping and broadcasts to waiters. `None`
    /// means the control plane says the service disappeared.
    pub fn publish(&self, key: &ServiceKey, kind: DataKind, data: Option<Arc<ServiceData>>) {
        match data {
            Some(data) => self.publish_data(key, kind, data),
            None => self.publish_absent(key, kind),
        }
    }

    fn publish_data(&self, key: &ServiceKey, kind: DataKind, data: Arc<ServiceData>) {
        let service = self.get_or_create_service(key);
        data.attach_service(&service);
        self.map(kind).update(key.clone(), Arc::clone(&data));

        if let Some(notify) = self.notify_for(key, kind) {
            notify.publish(Arc::clone(&data));
        }
        self.monitor
            .service_data_updated(key, kind, data.revision());

        if let Some(hook) = self.change_hook.read().unwrap().as_ref() {
            hook(Arc::clone(&data));
        }

        match data.status() {
            // Disk data never goes back to disk.
            DataStatus::InitFromDisk => {}
            DataStatus::NotFound => {
                let persist = Arc::clone(&self.persist);
                let key = key.clone();
                self.cache_executor
                    .submit(move || persist.delete_service(&key, kind));
            }
            _ => {
                let persist = Arc::clone(&self.persist);
                self.cache_executor.submit(move || persist.save_service(&data));
            }
        }
    }

    fn publish_absent(&self, key: &ServiceKey, kind: DataKind) {
        let gone = ServiceData::not_found(key.clone(), kind);
        if kind == DataKind::Instances {
            // The whole service entry goes with its instance data.
            self.map(kind).delete(std::slice::from_ref(key));
            self.evict_service(key);
        } else {
            self.map(kind).update(key.clone(), Arc::clone(&gone));
        }
        if let Some(notify) = self.notify_for(key, kind) {
            notify.publish(gone);
        }
        self.monitor.service_data_deleted(key, kind);
        let persist = Arc::clone(&self.persist);
        let key = key.clone();
        self.cache_executor
            .submit(move || persist.delete_service(&key, kind));
    }

    fn notify_for(&self, key: &ServiceKey, kind: DataKind) -> Option<Arc<ServiceDataNotify>> {
        self.notifies
            .lock()
            .unwrap()
            .get(&(key.clone(), kind))
            .cloned()
    }

    fn evict_service(&self, key: &ServiceKey) {
        self.services.lock().unwrap().remove(key);
        if let Some(hook) = self.evict_hook.read().unwrap().as_ref() {
            hook(key);
        }
    }

    /// Swaps the service's circuit-breaker aggregate.
    pub fn update_circuit_breaker(&self, key: &ServiceKey, update: CircuitBreakerUpdate) {
        match self.service(key) {
            Some(service) => service.set_circuit_breaker(update),
            None => {
                warn!(service = %key, "circuit breaker update for unknown service dropped")
            }
        }
    }

    pub fn update_set_circuit_breaker(
        &self,
        key: &ServiceKey,
        sets: HashMap<String, SetStatus>,
        version: u64,
    ) {
        match self.service(key) {
            Some(service) => service.set_unhealthy_sets(sets, version),
            None => {
                warn!(service = %key, "set breaker update for unknown service dropped")
            }
        }
    }

    /// Resolves the currently-open instance ids against the live snapshot,
    /// for health-check probing. Does not refresh the entry's access time.
    pub fn open_instances(
        &self,
        key: &ServiceKey,
    ) -> ApiResult<(Arc<ServiceData>, Vec<Arc<Instance>>)> {
        let data = self
            .map(DataKind::Instances)
            .peek(key)
            .ok_or(ApiError::ServiceNotFound)?;
        if data.status() < DataStatus::Syncing {
            return Err(ApiError::ServiceNotFound);
        }
        let service = data.service().ok_or(ApiError::ServiceNotFound)?;
        let instances_data = data.instances().ok_or(ApiError::ServiceNotFound)?;
        let open: Vec<_> = service
            .open_instances()
            .iter()
            .filter_map(|id| instances_data.by_id(id).cloned())
            .collect();
        if open.is_empty() {
            return Err(ApiError::InstanceNotFound);
        }
        Ok((data, open))
    }

    /// Resolves `host:port` to an instance id through the live snapshot.
    pub fn instance_id_by_host_port(
        &self,
        key: &ServiceKey,
        host: &str,
        port: u16,
    ) -> ApiResult<String> {
        let data = self
            .map(DataKind::Instances)
            .peek(key)
            .ok_or(ApiError::ServiceNotFound)?;
        let instances_data = data.instances().ok_or(ApiError::ServiceNotFound)?;
        instances_data
            .id_by_host_port(host, port)
            .map(str::to_string)
            .ok_or(ApiError::InstanceNotFound)
    }

    /// Tears down entries idle past the configured TTL. Instances expiry
    /// also evicts the per-service context.
    pub fn check_expired(&self, now_ms: u64) {
        let idle_before = now_ms.saturating_sub(self.config.service_expire_time.as_millis() as u64);
        for kind in DataKind::ALL {
            for key in self.map(kind).collect_expired(idle_before) {
                let had_subscription = self
                    .notifies
                    .lock()
                    .unwrap()
                    .remove(&(key.clone(), kind))
                    .is_some();
                if had_subscription {
                    self.fetcher.deregister(&key, kind);
                }
                self.map(kind).delete(std::slice::from_ref(&key));
                self.monitor.service_data_deleted(&key, kind);
                let persist = Arc::clone(&self.persist);
                let persist_key = key.clone();
                self.cache_executor
                    .submit(move || persist.delete_service(&persist_key, kind));
                if kind == DataKind::Instances {
                    self.evict_service(&key);
                }
                info!(service = %key, %kind, "expired idle service data");
            }
        }
    }

    /// Releases retired snapshots no epoch can still reference.
    pub fn sweep(&self, min_reclaim_time: u64) {
        for kind in DataKind::ALL {
            self.map(kind).sweep(min_reclaim_time);
        }
    }

    pub fn all_service_keys(&self) -> Vec<ServiceKey> {
        self.services.lock().unwrap().keys().cloned().collect()
    }
}
