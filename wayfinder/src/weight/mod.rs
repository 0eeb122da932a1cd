use crate::cache::clock;
use crate::conf::WeightAdjusterConfig;
use crate::model::ServiceData;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

#[cfg(test)]
mod tests;

/// Slow-start weight adjuster: instances newly appearing in a publish start
/// at a fraction of their static weight and ramp up over a window. Only the
/// per-instance dynamic weight is touched; the owning context bumps the
/// dynamic-weight version after each tick so balancer caches rebuild.
pub struct SlowStartAdjuster {
    config: WeightAdjusterConfig,
    /// instance id -> ramp start (steady ms)
    ramps: Mutex<HashMap<String, u64>>,
}

impl SlowStartAdjuster {
    pub fn new(mut config: WeightAdjusterConfig) -> Self {
        if config.window < 10_000 {
            tracing::warn!("weight adjuster window floored to 10s");
            config.window = 10_000;
        }
        if config.step_size < 1_000 {
            tracing::warn!("weight adjuster step size floored to 1s");
            config.step_size = 1_000;
        }
        Self {
            config,
            ramps: Mutex::new(HashMap::new()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enable
    }

    pub fn step_size(&self) -> Duration {
        Duration::from_millis(self.config.step_size)
    }

    /// Registers instances present in `new_data` but not in `old_data` and
    /// seeds their dynamic weight. Returns true when a ramp tick task needs
    /// to be armed (the ramp set was empty before).
    pub fn on_instances_update(
        &self,
        new_data: &ServiceData,
        old_data: Option<&ServiceData>,
    ) -> bool {
        if !self.config.enable {
            return false;
        }
        // The very first snapshot carries no history to ramp against.
        let Some(old_instances) = old_data.and_then(|data| data.instances()) else {
            return false;
        };
        let Some(new_instances) = new_data.instances() else {
            return false;
        };
        if old_instances.instances().is_empty() || new_instances.instances().is_empty() {
            return false;
        }

        let now = clock::steady_ms();
        let mut added = Vec::new();
        for instance in new_instances.instances() {
            if !old_instances.contains(instance.id()) {
                let seeded =
                    (instance.weight() as f64 * self.config.min_weight_percent).round() as u32;
                instance.set_dynamic_weight(seeded);
                debug!(
                    instance = instance.id(),
                    dynamic = seeded,
                    static_weight = instance.weight(),
                    "seeded slow-start weight"
                );
                added.push(instance.id().to_string());
            }
        }
        if added.is_empty() {
            return false;
        }

        let mut ramps = self.ramps.lock().unwrap();
        let need_task = ramps.is_empty();
        for id in added {
            ramps.insert(id, now);
        }
        need_task
    }

    /// One ramp tick over the current snapshot. Returns true while entries
    /// remain to adjust.
    pub fn adjust(&self, data: &ServiceData) -> bool {
        let Some(instances) = data.instances() else {
            return false;
        };
        let snapshot: Vec<(String, u64)> = {
            let ramps = self.ramps.lock().unwrap();
            ramps.iter().map(|(id, start)| (id.clone(), *start)).collect()
        };

        let now = clock::steady_ms();
        let mut done = Vec::new();
        for (id, started_at) in snapshot {
            let Some(instance) = instances.by_id(&id) else {
                done.push(id);
                continue;
            };
            let elapsed = now.saturating_sub(started_at);
            if elapsed >= self.config.window {
                instance.set_dynamic_weight(instance.weight());
                done.push(id);
            } else {
                let time_fraction = elapsed as f64 / self.config.window as f64;
                let factor = Self::aggression_factor(time_fraction, self.config.aggression)
                    .max(self.config.min_weight_percent);
                instance.set_dynamic_weight((instance.weight() as f64 * factor).round() as u32);
            }
        }

        let mut ramps = self.ramps.lock().unwrap();
        for id in done {
            ramps.remove(&id);
        }
        !ramps.is_empty()
    }

    fn aggression_factor(time_fraction: f64, aggression: f64) -> f64 {
        if aggression == 1.0 || time_fraction == 1.0 {
            time_fraction
        } else {
            time_fraction.powf(1.0 / aggression)
        }
    }
}
