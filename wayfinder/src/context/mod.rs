mod service_context;

pub use service_context::*;

#[cfg(test)]
mod tests;

use crate::cache::{EpochTracker, PersistConfig, PersistStore, ReadMostlyMap, clock};
use crate::conf::{ClientConfig, HealthCheckWhen};
use crate::error::{ApiError, ApiResult};
use crate::model::{ClientLocation, DataKind, ServiceKey};
use crate::monitor::{ApiStatRegistry, MonitorSink};
use crate::registry::{DataFetcher, ServiceStore, StoreConfig};
use crate::route::ClearableCache;
use crate::sched::Executor;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

/// Process-wide state behind a client: validated configuration, epoch
/// tracker, local registry, executors, and the lazily-created per-service
/// contexts.
pub struct ClientContext {
    config: ClientConfig,
    epoch: EpochTracker,
    store: Arc<ServiceStore>,
    fetcher: Arc<dyn DataFetcher>,
    monitor: Arc<dyn MonitorSink>,
    api_stats: ApiStatRegistry,
    client_location: Arc<ClientLocation>,
    service_contexts: Arc<ReadMostlyMap<ServiceKey, ServiceContext>>,
    clearables: Mutex<Vec<Arc<dyn ClearableCache>>>,
    cache_executor: Arc<Executor>,
    breaker_executor: Arc<Executor>,
    /// Per-process client identity reported to the control plane.
    client_id: uuid::Uuid,
    /// Owning process id; a mismatch means the caller forked.
    created_pid: u32,
}

impl ClientContext {
    pub fn new(
        config: ClientConfig,
        fetcher: Arc<dyn DataFetcher>,
        monitor: Arc<dyn MonitorSink>,
    ) -> ApiResult<Arc<Self>> {
        if config.validate().is_err() {
            return Err(ApiError::InvalidConfig);
        }
        let owns_logging = crate::logging::init_from_config(&config.global.log);

        let cache_executor = Executor::new("cache_mgr");
        let breaker_executor = Executor::new("breaker");

        let local_cache = &config.consumer.local_cache;
        let persist = Arc::new(PersistStore::new(PersistConfig {
            dir: PathBuf::from(&local_cache.persist_dir),
            available_time: Duration::from_millis(local_cache.persist_available_time),
            max_write_retry: local_cache.persist_max_write_retry,
            retry_interval: Duration::from_millis(local_cache.persist_retry_interval),
        }));

        let client_location = Arc::new(ClientLocation::new(
            persist.load_location().unwrap_or_default(),
        ));

        let system = &config.global.system;
        let system_intervals = [
            &system.discover_cluster,
            &system.heartbeat_cluster,
            &system.monitor_cluster,
            &system.metric_cluster,
        ]
        .into_iter()
        .filter(|cluster| !cluster.service.is_empty())
        .map(|cluster| {
            (
                ServiceKey::new(cluster.namespace.clone(), cluster.service.clone()),
                Duration::from_millis(cluster.refresh_interval),
            )
        })
        .collect();

        let store = ServiceStore::new(
            StoreConfig {
                service_expire_time: Duration::from_millis(local_cache.service_expire_time),
                service_refresh_interval: Duration::from_millis(
                    local_cache.service_refresh_interval,
                ),
                system_intervals,
            },
            Arc::clone(&fetcher),
            persist,
            Arc::clone(&cache_executor),
            Arc::clone(&monitor),
        );

        let context = Arc::new(Self {
            config,
            epoch: EpochTracker::new(),
            store: Arc::clone(&store),
            fetcher,
            monitor,
            api_stats: ApiStatRegistry::new(),
            client_location,
            service_contexts: Arc::new(ReadMostlyMap::new()),
            clearables: Mutex::new(Vec::new()),
            cache_executor,
            breaker_executor,
            client_id: uuid::Uuid::new_v4(),
            created_pid: std::process::id(),
        });

        context.install_store_hooks();
        context.schedule_background_tasks();
        info!(
            client_id = %context.client_id,
            owns_logging,
            "wayfinder client context created"
        );
        Ok(context)
    }

    fn install_store_hooks(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.store.set_change_hook(Box::new(move |data| {
            let Some(context) = weak.upgrade() else {
                return;
            };
            let key = data.service_key().clone();
            let Some(service_context) = context.service_contexts.peek(&key) else {
                return;
            };
            match data.kind() {
                DataKind::Instances => service_context.update_instances(data),
                DataKind::RouteRule => service_context.update_routings(data),
                DataKind::RateLimit | DataKind::CircuitBreakerConfig => {}
            }
        }));

        let contexts = Arc::clone(&self.service_contexts);
        self.store.set_evict_hook(Box::new(move |key| {
            contexts.delete(std::slice::from_ref(key));
        }));
    }

    fn schedule_background_tasks(self: &Arc<Self>) {
        // Registry GC, service expiry, and filter-cache trimming.
        let weak = Arc::downgrade(self);
        let cache_clear_time = self.config.global.api.cache_clear_time;
        self.cache_executor
            .submit_timing(Duration::from_secs(1), move || {
                let context = weak.upgrade()?;
                let now = clock::steady_ms();
                // Margin past the epoch minimum, matching the GC cadence.
                let reclaim_before = context.epoch.min_time().saturating_sub(2_000);
                context.store.sweep(reclaim_before);
                context.store.check_expired(now);
                let idle_before = now.saturating_sub(cache_clear_time);
                for cache in context.clearables.lock().unwrap().iter() {
                    cache.clear_idle(idle_before);
                }
                Some(now + 1_000)
            });

        // Breaker timing cycles and health probe rounds.
        let weak = Arc::downgrade(self);
        let mut health_next: HashMap<ServiceKey, u64> = HashMap::new();
        self.breaker_executor
            .submit_timing(Duration::from_millis(100), move || {
                let context = weak.upgrade()?;
                let now = clock::steady_ms();
                for (key, service_context) in context.service_contexts.entries() {
                    service_context.timing_circuit_break();
                    let health = service_context.health_chain();
                    if health.when() != HealthCheckWhen::Never {
                        let due = health_next.entry(key.clone()).or_insert(0);
                        if now >= *due {
                            health.run_round(service_context.breaker_chain());
                            *due = now + health.interval().as_millis() as u64;
                        }
                    }
                }
                Some(now + 100)
            });

        // Client location re-report.
        let weak = Arc::downgrade(self);
        let report_interval = Duration::from_millis(self.config.global.api.report_interval);
        let bind_ip = self.config.global.api.bind_ip.clone();
        let timeout = Duration::from_millis(self.config.global.api.timeout);
        self.cache_executor.submit_timing(report_interval, move || {
            let context = weak.upgrade()?;
            match context.fetcher.report_client(&bind_ip, timeout) {
                Ok(location) => {
                    if context.client_location.update(location) {
                        info!("client location changed, persisting");
                    }
                }
                Err(err) => {
                    warn!(%err, "report client failed, retrying next cycle");
                }
            }
            Some(clock::steady_ms() + report_interval.as_millis() as u64)
        });
    }

    pub fn epoch(&self) -> &EpochTracker {
        &self.epoch
    }

    pub fn client_id(&self) -> uuid::Uuid {
        self.client_id
    }

    pub fn store(&self) -> &Arc<ServiceStore> {
        &self.store
    }

    pub fn monitor(&self) -> &Arc<dyn MonitorSink> {
        &self.monitor
    }

    pub fn api_stats(&self) -> &ApiStatRegistry {
        &self.api_stats
    }

    pub fn client_location(&self) -> &Arc<ClientLocation> {
        &self.client_location
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.config.global.api.timeout)
    }

    /// Every public entry point checks the owning process: after a fork the
    /// child sees the parent's state and must not touch it.
    pub fn fork_check(&self) -> ApiResult<()> {
        if std::process::id() != self.created_pid {
            return Err(ApiError::CallAfterFork);
        }
        Ok(())
    }

    /// The per-service context, created lazily from the global defaults
    /// merged with any per-service override.
    pub fn service_context(&self, key: &ServiceKey) -> ApiResult<Arc<ServiceContext>> {
        if let Some(existing) = self.service_contexts.get(key) {
            return Ok(existing);
        }
        let view = self.config.service_view(key);
        let built = ServiceContext::new(
            key.clone(),
            &view,
            Arc::clone(&self.store),
            Arc::clone(&self.client_location),
            Arc::clone(&self.monitor),
            Arc::clone(&self.cache_executor),
        )?;
        let context = self
            .service_contexts
            .create_or_get(key.clone(), || Arc::clone(&built));
        if Arc::ptr_eq(&context, &built) {
            // First creation wires the new context's caches into the sweeper
            // and catches it up with any already-published snapshots.
            let mut clearables = self.clearables.lock().unwrap();
            clearables.extend(context.clearables());
            drop(clearables);
            if let Some(data) = self.store.peek_service_data(key, DataKind::Instances) {
                context.update_instances(data);
            }
            if let Some(data) = self.store.peek_service_data(key, DataKind::RouteRule) {
                context.update_routings(data);
            }
        }
        Ok(context)
    }
}

impl Drop for ClientContext {
    fn drop(&mut self) {
        self.cache_executor.shutdown();
        self.breaker_executor.shutdown();
    }
}
