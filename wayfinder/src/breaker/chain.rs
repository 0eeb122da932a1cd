use crate::breaker::{
    CircuitBreakerPlugin, ErrorCountBreaker, ErrorRateBreaker, InstanceGauge, SetBreaker,
};
use crate::cache::clock;
use crate::conf::{self, CircuitBreakerConfig, HealthCheckWhen};
use crate::error::{ApiError, ApiResult};
use crate::model::{CircuitBreakerUpdate, CircuitStatus, ServiceKey};
use crate::monitor::{CircuitChangeRecord, MonitorSink};
use crate::registry::ServiceStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, trace};

#[derive(Debug, Clone)]
struct PluginMeta {
    name: String,
    request_after_half_open: u32,
}

#[derive(Debug, Default)]
struct InstanceChainStatus {
    status: CircuitStatus,
    /// 1-based index into the plugin list; 0 means vacant.
    owner: usize,
    change_seq: u64,
}

/// Shared per-service transition table. Exactly one plugin owns an instance
/// while it is away from `Closed`; every accepted transition bumps
/// `current_version`.
pub struct ChainData {
    plugins_meta: Vec<PluginMeta>,
    status_map: Mutex<HashMap<String, InstanceChainStatus>>,
    current_version: AtomicU64,
    last_published_version: AtomicU64,
}

impl ChainData {
    fn new(plugins_meta: Vec<PluginMeta>) -> Self {
        Self {
            plugins_meta,
            status_map: Mutex::new(HashMap::new()),
            current_version: AtomicU64::new(0),
            last_published_version: AtomicU64::new(0),
        }
    }

    pub fn current_version(&self) -> u64 {
        self.current_version.load(Ordering::Acquire)
    }

    pub fn status_of(&self, instance_id: &str) -> CircuitStatus {
        self.status_map
            .lock()
            .unwrap()
            .get(instance_id)
            .map(|entry| entry.status)
            .unwrap_or(CircuitStatus::Closed)
    }

    /// Transition rule: only the owner (or anyone, when vacant) may move an
    /// instance, the current status must equal `from`, and the transition
    /// must actually change something. Closing releases ownership.
    pub fn translate_status(
        &self,
        plugin_index: usize,
        instance_id: &str,
        from: CircuitStatus,
        to: CircuitStatus,
    ) -> Option<CircuitChangeRecord> {
        let mut map = self.status_map.lock().unwrap();
        let entry = map.entry(instance_id.to_string()).or_default();
        if entry.owner != 0 && entry.owner != plugin_index {
            return None;
        }
        let plugin_name = self.plugins_meta[plugin_index - 1].name.clone();
        trace!(
            plugin = plugin_name,
            instance = instance_id,
            %from,
            %to,
            "try to translate circuit breaker status"
        );
        if entry.status != from || from == to {
            return None;
        }
        entry.change_seq += 1;
        let record = CircuitChangeRecord {
            change_time_ms: clock::system_ms(),
            seq: entry.change_seq,
            from,
            to,
            reason: plugin_name,
        };
        if to == CircuitStatus::Closed {
            map.remove(instance_id);
        } else {
            let entry = map.get_mut(instance_id).unwrap();
            entry.status = to;
            entry.owner = plugin_index;
        }
        self.current_version.fetch_add(1, Ordering::AcqRel);
        Some(record)
    }

    /// Republishes `(open_set, half_open_map)` to the registry when the
    /// version moved. Returns the published version.
    pub fn check_and_sync(&self, store: &ServiceStore, key: &ServiceKey) -> Option<u64> {
        let current = self.current_version.load(Ordering::Acquire);
        if self.last_published_version.load(Ordering::Acquire) == current {
            return None;
        }
        let map = self.status_map.lock().unwrap();
        let current = self.current_version.load(Ordering::Acquire);
        if self.last_published_version.load(Ordering::Acquire) == current {
            return None;
        }
        let mut update = CircuitBreakerUpdate {
            version: current,
            ..Default::default()
        };
        for (instance_id, entry) in map.iter() {
            match entry.status {
                CircuitStatus::Open => {
                    update.open.insert(instance_id.clone());
                }
                CircuitStatus::HalfOpen => {
                    let budget = self.plugins_meta[entry.owner - 1].request_after_half_open;
                    update.half_open.insert(instance_id.clone(), budget);
                }
                CircuitStatus::Closed => {}
            }
        }
        drop(map);
        debug!(service = %key, version = current, "publishing circuit breaker status");
        store.update_circuit_breaker(key, update);
        self.last_published_version.store(current, Ordering::Release);
        Some(current)
    }
}

/// Per-plugin handle into the shared table; accepted transitions are
/// reported to the monitor.
pub struct PluginStatusView {
    chain_data: Arc<ChainData>,
    plugin_index: usize,
    service_key: ServiceKey,
    monitor: Arc<dyn MonitorSink>,
}

impl PluginStatusView {
    pub fn status(&self, instance_id: &str) -> CircuitStatus {
        self.chain_data.status_of(instance_id)
    }

    pub fn translate(&self, instance_id: &str, from: CircuitStatus, to: CircuitStatus) -> bool {
        match self
            .chain_data
            .translate_status(self.plugin_index, instance_id, from, to)
        {
            Some(record) => {
                self.monitor
                    .circuit_change(&self.service_key, instance_id, &record);
                true
            }
            None => false,
        }
    }
}

/// Composed per-instance breakers plus the optional set-level breaker.
pub struct CircuitBreakerChain {
    service_key: ServiceKey,
    enabled: bool,
    check_period_ms: u64,
    next_check_time: AtomicU64,
    plugins: Vec<Arc<dyn CircuitBreakerPlugin>>,
    views: Vec<PluginStatusView>,
    chain_data: Arc<ChainData>,
    set_breaker: Option<SetBreaker>,
    store: Arc<ServiceStore>,
    /// Extra owner slot for probe-driven opens by the health-check chain.
    health_slot: Option<usize>,
}

impl CircuitBreakerChain {
    pub fn new(
        service_key: ServiceKey,
        config: &CircuitBreakerConfig,
        health_check_when: HealthCheckWhen,
        store: Arc<ServiceStore>,
        monitor: Arc<dyn MonitorSink>,
    ) -> ApiResult<Self> {
        if !config.enable {
            debug!(service = %service_key, "circuit breaker disabled");
            return Ok(Self {
                service_key,
                enabled: false,
                check_period_ms: config.check_period,
                next_check_time: AtomicU64::new(0),
                plugins: Vec::new(),
                views: Vec::new(),
                chain_data: Arc::new(ChainData::new(Vec::new())),
                set_breaker: None,
                store,
                health_slot: None,
            });
        }

        let mut plugins: Vec<Arc<dyn CircuitBreakerPlugin>> = Vec::new();
        for name in &config.chain {
            match name.as_str() {
                conf::BREAKER_ERROR_COUNT => {
                    plugins.push(Arc::new(ErrorCountBreaker::new(config.error_count.clone())));
                }
                conf::BREAKER_ERROR_RATE => {
                    plugins.push(Arc::new(ErrorRateBreaker::new(config.error_rate.clone())));
                }
                other => {
                    error!(service = %service_key, plugin = other, "unknown circuit breaker plugin");
                    return Err(ApiError::PluginError);
                }
            }
        }

        let mut plugins_meta: Vec<PluginMeta> = plugins
            .iter()
            .map(|plugin| PluginMeta {
                name: plugin.name().to_string(),
                request_after_half_open: plugin.request_after_half_open(),
            })
            .collect();

        let health_slot = (health_check_when == HealthCheckWhen::Always).then(|| {
            plugins_meta.push(PluginMeta {
                name: "health_check".to_string(),
                request_after_half_open: 1,
            });
            plugins_meta.len()
        });

        let chain_data = Arc::new(ChainData::new(plugins_meta));
        let views = (1..=plugins.len() + health_slot.is_some() as usize)
            .map(|plugin_index| PluginStatusView {
                chain_data: Arc::clone(&chain_data),
                plugin_index,
                service_key: service_key.clone(),
                monitor: Arc::clone(&monitor),
            })
            .collect();

        let set_breaker = config
            .set_circuit_breaker
            .enable
            .then(|| SetBreaker::new(service_key.clone(), config.set_circuit_breaker.clone()));

        Ok(Self {
            service_key,
            enabled: true,
            check_period_ms: config.check_period,
            next_check_time: AtomicU64::new(0),
            plugins,
            views,
            chain_data,
            set_breaker,
            store,
            health_slot,
        })
    }

    pub fn chain_data(&self) -> &Arc<ChainData> {
        &self.chain_data
    }

    /// Feeds one call result through every plugin. Returns the new breaker
    /// version when the published state changed.
    pub fn real_time_break(&self, gauge: &InstanceGauge) -> Option<u64> {
        if !self.enabled {
            return None;
        }
        for (index, plugin) in self.plugins.iter().enumerate() {
            plugin.real_time_break(gauge, &self.views[index]);
        }
        let version = self.chain_data.check_and_sync(&self.store, &self.service_key);
        if let Some(set_breaker) = &self.set_breaker {
            set_breaker.real_time_break(gauge, &self.store);
        }
        version
    }

    /// Periodic pass at `checkPeriod` granularity: probe promotions and
    /// stat cleanup.
    pub fn timing_break(&self, exists: &dyn Fn(&str) -> bool) -> Option<u64> {
        if !self.enabled {
            return None;
        }
        let now = clock::steady_ms();
        if now < self.next_check_time.load(Ordering::Acquire) {
            return None;
        }
        self.next_check_time
            .store(now + self.check_period_ms, Ordering::Release);
        for (index, plugin) in self.plugins.iter().enumerate() {
            plugin.timing_break(&self.views[index]);
            plugin.clean_stats(exists);
        }
        let version = self.chain_data.check_and_sync(&self.store, &self.service_key);
        if let Some(set_breaker) = &self.set_breaker {
            set_breaker.timing_break(&self.store);
        }
        version
    }

    /// Entry point for the health-check chain. Probe-driven opens go
    /// through the dedicated extra owner slot; recovery transitions are
    /// offered to every plugin.
    pub fn translate_status(
        &self,
        instance_id: &str,
        from: CircuitStatus,
        to: CircuitStatus,
    ) -> bool {
        if !self.enabled {
            return false;
        }
        if from == CircuitStatus::Closed && to == CircuitStatus::Open {
            return match self.health_slot {
                Some(slot) => self.views[slot - 1].translate(instance_id, from, to),
                None => false,
            };
        }
        let mut translated = false;
        for (index, view) in self.views.iter().enumerate() {
            if view.translate(instance_id, from, to) {
                translated = true;
                if index < self.plugins.len()
                    && from == CircuitStatus::Open
                    && to == CircuitStatus::HalfOpen
                {
                    self.plugins[index].on_half_open(instance_id);
                }
            }
        }
        translated
    }

    /// Publishes any pending state and reports the version, used after
    /// out-of-band transitions.
    pub fn sync_now(&self) -> Option<u64> {
        if !self.enabled {
            return None;
        }
        self.chain_data.check_and_sync(&self.store, &self.service_key)
    }
}
