use crate::breaker::{CircuitBreakerPlugin, InstanceGauge, PluginStatusView};
use crate::cache::clock;
use crate::conf::ErrorRateConfig;
use crate::model::CircuitStatus;
use dashmap::DashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    start_ms: u64,
    total: u32,
    errors: u32,
}

#[derive(Debug)]
struct InstanceStats {
    buckets: Vec<Bucket>,
    opened_at: u64,
    half_open_successes: u32,
    last_access: u64,
}

/// Opens an instance when the error rate over a bucketed sliding window
/// crosses the threshold, once enough volume has been observed.
pub struct ErrorRateBreaker {
    config: ErrorRateConfig,
    bucket_width_ms: u64,
    stats: DashMap<String, Mutex<InstanceStats>>,
}

impl ErrorRateBreaker {
    pub fn new(config: ErrorRateConfig) -> Self {
        let bucket_width_ms =
            (config.metric_stat_time_window / config.metric_num_buckets.max(1) as u64).max(1);
        Self {
            config,
            bucket_width_ms,
            stats: DashMap::new(),
        }
    }

    fn record(&self, stats: &mut InstanceStats, now: u64, error: bool) {
        let bucket_start = now - now % self.bucket_width_ms;
        let index = ((bucket_start / self.bucket_width_ms)
            % self.config.metric_num_buckets as u64) as usize;
        let bucket = &mut stats.buckets[index];
        if bucket.start_ms != bucket_start {
            *bucket = Bucket {
                start_ms: bucket_start,
                total: 0,
                errors: 0,
            };
        }
        bucket.total += 1;
        if error {
            bucket.errors += 1;
        }
    }

    fn window_counts(&self, stats: &InstanceStats, now: u64) -> (u32, u32) {
        let window_start = now.saturating_sub(self.config.metric_stat_time_window);
        let mut total = 0;
        let mut errors = 0;
        for bucket in &stats.buckets {
            if bucket.start_ms >= window_start {
                total += bucket.total;
                errors += bucket.errors;
            }
        }
        (total, errors)
    }
}

impl CircuitBreakerPlugin for ErrorRateBreaker {
    fn name(&self) -> &'static str {
        "errorRate"
    }

    fn request_after_half_open(&self) -> u32 {
        self.config.request_count_after_half_open
    }

    fn real_time_break(&self, gauge: &InstanceGauge, view: &PluginStatusView) {
        let now = clock::steady_ms();
        let entry = self
            .stats
            .entry(gauge.instance_id.clone())
            .or_insert_with(|| {
                Mutex::new(InstanceStats {
                    buckets: vec![Bucket::default(); self.config.metric_num_buckets as usize],
                    opened_at: 0,
                    half_open_successes: 0,
                    last_access: now,
                })
            });
        let mut stats = entry.lock().unwrap();
        stats.last_access = now;

        match view.status(&gauge.instance_id) {
            CircuitStatus::Closed => {
                self.record(&mut stats, now, gauge.is_error());
                let (total, errors) = self.window_counts(&stats, now);
                if total >= self.config.request_volume_threshold
                    && errors as f64 >= total as f64 * self.config.error_rate_threshold
                    && view.translate(
                        &gauge.instance_id,
                        CircuitStatus::Closed,
                        CircuitStatus::Open,
                    )
                {
                    stats.opened_at = now;
                    for bucket in &mut stats.buckets {
                        *bucket = Bucket::default();
                    }
                }
            }
            CircuitStatus::HalfOpen => {
                if gauge.is_error() {
                    if view.translate(
                        &gauge.instance_id,
                        CircuitStatus::HalfOpen,
                        CircuitStatus::Open,
                    ) {
                        stats.opened_at = now;
                        stats.half_open_successes = 0;
                    }
                } else {
                    stats.half_open_successes += 1;
                    if stats.half_open_successes >= self.config.request_count_after_half_open
                        && view.translate(
                            &gauge.instance_id,
                            CircuitStatus::HalfOpen,
                            CircuitStatus::Closed,
                        )
                    {
                        stats.half_open_successes = 0;
                    }
                }
            }
            CircuitStatus::Open => {}
        }
    }

    fn timing_break(&self, view: &PluginStatusView) {
        let now = clock::steady_ms();
        for entry in self.stats.iter() {
            if view.status(entry.key()) != CircuitStatus::Open {
                continue;
            }
            let mut stats = entry.lock().unwrap();
            if stats.opened_at != 0
                && now.saturating_sub(stats.opened_at) >= self.config.sleep_window
                && view.translate(entry.key(), CircuitStatus::Open, CircuitStatus::HalfOpen)
            {
                stats.half_open_successes = 0;
            }
        }
    }

    fn clean_stats(&self, exists: &dyn Fn(&str) -> bool) {
        let expire_before = clock::steady_ms().saturating_sub(self.config.metric_stat_time_window * 2);
        self.stats.retain(|instance_id, stats| {
            exists(instance_id) && stats.lock().unwrap().last_access >= expire_before
        });
    }

    fn on_half_open(&self, instance_id: &str) {
        if let Some(entry) = self.stats.get(instance_id) {
            entry.lock().unwrap().half_open_successes = 0;
        }
    }
}
