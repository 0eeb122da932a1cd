use crate::breaker::{CircuitBreakerPlugin, InstanceGauge, PluginStatusView};
use crate::cache::clock;
use crate::conf::ErrorCountConfig;
use crate::model::CircuitStatus;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

#[derive(Debug, Default)]
struct InstanceStats {
    consecutive_errors: AtomicU32,
    opened_at: AtomicU64,
    half_open_successes: AtomicU32,
    last_access: AtomicU64,
}

/// Opens an instance after a run of consecutive failures; half-open probing
/// must fully succeed to close it again, any probe failure re-opens.
pub struct ErrorCountBreaker {
    config: ErrorCountConfig,
    stats: DashMap<String, InstanceStats>,
}

impl ErrorCountBreaker {
    pub fn new(config: ErrorCountConfig) -> Self {
        Self {
            config,
            stats: DashMap::new(),
        }
    }

    fn with_stats<R>(&self, instance_id: &str, f: impl FnOnce(&InstanceStats) -> R) -> R {
        let entry = self
            .stats
            .entry(instance_id.to_string())
            .or_default();
        entry.last_access.store(clock::steady_ms(), Ordering::Relaxed);
        f(&entry)
    }
}

impl CircuitBreakerPlugin for ErrorCountBreaker {
    fn name(&self) -> &'static str {
        "errorCount"
    }

    fn request_after_half_open(&self) -> u32 {
        self.config.request_count_after_half_open
    }

    fn real_time_break(&self, gauge: &InstanceGauge, view: &PluginStatusView) {
        let status = view.status(&gauge.instance_id);
        self.with_stats(&gauge.instance_id, |stats| match status {
            CircuitStatus::Closed => {
                if gauge.is_error() {
                    let errors = stats.consecutive_errors.fetch_add(1, Ordering::AcqRel) + 1;
                    if errors >= self.config.continuous_error_threshold
                        && view.translate(
                            &gauge.instance_id,
                            CircuitStatus::Closed,
                            CircuitStatus::Open,
                        )
                    {
                        stats.opened_at.store(clock::steady_ms(), Ordering::Release);
                        stats.consecutive_errors.store(0, Ordering::Release);
                    }
                } else {
                    stats.consecutive_errors.store(0, Ordering::Release);
                }
            }
            CircuitStatus::HalfOpen => {
                if gauge.is_error() {
                    // A failed probe re-opens immediately.
                    if view.translate(
                        &gauge.instance_id,
                        CircuitStatus::HalfOpen,
                        CircuitStatus::Open,
                    ) {
                        stats.opened_at.store(clock::steady_ms(), Ordering::Release);
                        stats.half_open_successes.store(0, Ordering::Release);
                    }
                } else {
                    let successes =
                        stats.half_open_successes.fetch_add(1, Ordering::AcqRel) + 1;
                    if successes >= self.config.request_count_after_half_open
                        && view.translate(
                            &gauge.instance_id,
                            CircuitStatus::HalfOpen,
                            CircuitStatus::Closed,
                        )
                    {
                        stats.half_open_successes.store(0, Ordering::Release);
                        stats.consecutive_errors.store(0, Ordering::Release);
                    }
                }
            }
            CircuitStatus::Open => {
                // Results reported while open only refresh access time.
            }
        });
    }

    fn timing_break(&self, view: &PluginStatusView) {
        let now = clock::steady_ms();
        for entry in self.stats.iter() {
            if view.status(entry.key()) != CircuitStatus::Open {
                continue;
            }
            let opened_at = entry.opened_at.load(Ordering::Acquire);
            if opened_at != 0
                && now.saturating_sub(opened_at) >= self.config.sleep_window
                && view.translate(entry.key(), CircuitStatus::Open, CircuitStatus::HalfOpen)
            {
                entry.half_open_successes.store(0, Ordering::Release);
            }
        }
    }

    fn clean_stats(&self, exists: &dyn Fn(&str) -> bool) {
        let expire_before = clock::steady_ms().saturating_sub(self.config.metric_expired_time);
        self.stats.retain(|instance_id, stats| {
            exists(instance_id) && stats.last_access.load(Ordering::Relaxed) >= expire_before
        });
    }

    fn on_half_open(&self, instance_id: &str) {
        if let Some(stats) = self.stats.get(instance_id) {
            stats.half_open_successes.store(0, Ordering::Release);
        }
    }
}
