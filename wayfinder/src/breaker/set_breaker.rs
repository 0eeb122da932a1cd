use crate::breaker::InstanceGauge;
use crate::cache::clock;
use crate::conf::SetBreakerConfig;
use crate::model::{DataKind, ServiceKey, SetStatus};
use crate::registry::ServiceStore;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

#[derive(Debug, Default)]
struct SetStats {
    total: u32,
    errors: u32,
    window_start: u64,
    status: Option<SetStatus>,
    opened_at: u64,
    half_open_successes: u32,
}

/// Set-level breaker: judges whole `name.area.group` sets by error rate and
/// republishes the aggregate unhealthy-set map on the service.
pub struct SetBreaker {
    service_key: ServiceKey,
    config: SetBreakerConfig,
    stats: Mutex<HashMap<String, SetStats>>,
    version: AtomicU64,
}

impl SetBreaker {
    pub fn new(service_key: ServiceKey, config: SetBreakerConfig) -> Self {
        Self {
            service_key,
            config,
            stats: Mutex::new(HashMap::new()),
            version: AtomicU64::new(0),
        }
    }

    fn set_label_of(&self, gauge: &InstanceGauge, store: &ServiceStore) -> Option<String> {
        let data = store.peek_service_data(&self.service_key, DataKind::Instances)?;
        let instances = data.instances()?;
        let instance = instances.by_id(&gauge.instance_id)?;
        instance.set_name().map(str::to_string)
    }

    pub fn real_time_break(&self, gauge: &InstanceGauge, store: &ServiceStore) {
        let Some(label) = self.set_label_of(gauge, store) else {
            return;
        };
        let now = clock::steady_ms();
        let mut changed = false;
        {
            let mut stats = self.stats.lock().unwrap();
            let entry = stats.entry(label.clone()).or_default();
            match entry.status {
                None => {
                    if now.saturating_sub(entry.window_start) > self.config.sleep_window {
                        entry.window_start = now;
                        entry.total = 0;
                        entry.errors = 0;
                    }
                    entry.total += 1;
                    if gauge.is_error() {
                        entry.errors += 1;
                    }
                    if entry.total >= self.config.request_volume_threshold
                        && entry.errors as f64
                            >= entry.total as f64 * self.config.error_rate_threshold
                    {
                        debug!(service = %self.service_key, set = label, "set breaker opened");
                        entry.status = Some(SetStatus::Open);
                        entry.opened_at = now;
                        changed = true;
                    }
                }
                Some(SetStatus::HalfOpen) => {
                    if gauge.is_error() {
                        entry.status = Some(SetStatus::Open);
                        entry.opened_at = now;
                        entry.half_open_successes = 0;
                    } else {
                        entry.half_open_successes += 1;
                        if entry.half_open_successes >= self.config.request_count_after_half_open {
                            stats.remove(&label);
                        }
                    }
                    changed = true;
                }
                Some(SetStatus::Open) => {}
            }
        }
        if changed {
            self.publish(store);
        }
    }

    pub fn timing_break(&self, store: &ServiceStore) {
        let now = clock::steady_ms();
        let mut changed = false;
        {
            let mut stats = self.stats.lock().unwrap();
            for entry in stats.values_mut() {
                if entry.status == Some(SetStatus::Open)
                    && now.saturating_sub(entry.opened_at) >= self.config.sleep_window
                {
                    entry.status = Some(SetStatus::HalfOpen);
                    entry.half_open_successes = 0;
                    changed = true;
                }
            }
        }
        if changed {
            self.publish(store);
        }
    }

    fn publish(&self, store: &ServiceStore) {
        let unhealthy: HashMap<String, SetStatus> = {
            let stats = self.stats.lock().unwrap();
            stats
                .iter()
                .filter_map(|(label, entry)| entry.status.map(|status| (label.clone(), status)))
                .collect()
        };
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        store.update_set_circuit_breaker(&self.service_key, unhealthy, version);
    }
}
