mod chain;
mod error_count;
mod error_rate;
mod set_breaker;

pub use chain::*;
pub use error_count::*;
pub use error_rate::*;
pub use set_breaker::*;

#[cfg(test)]
mod tests;

use crate::model::ServiceKey;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRetStatus {
    Ok,
    Timeout,
    Error,
}

/// One reported call result, fed through every breaker plugin.
#[derive(Debug, Clone)]
pub struct InstanceGauge {
    pub service_key: ServiceKey,
    pub instance_id: String,
    pub latency: Duration,
    pub ret_status: CallRetStatus,
    pub ret_code: i32,
    /// Locality-aware balancer correlation tag; zero when absent.
    pub locality_tag: u64,
}

impl InstanceGauge {
    pub fn is_error(&self) -> bool {
        self.ret_status != CallRetStatus::Ok
    }
}

/// A breaker plugin judges call results and drives transitions through its
/// [`PluginStatusView`]. Work here never fails the reporting request.
pub trait CircuitBreakerPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// Probe budget granted when this plugin moves an instance to
    /// half-open.
    fn request_after_half_open(&self) -> u32;

    fn real_time_break(&self, gauge: &InstanceGauge, view: &PluginStatusView);

    /// Periodic pass: time-to-probe promotion and any window upkeep.
    fn timing_break(&self, view: &PluginStatusView);

    /// Drops stats for instances the checker no longer knows.
    fn clean_stats(&self, exists: &dyn Fn(&str) -> bool);

    /// The owner just promoted this instance to half-open; reset probe
    /// accounting.
    fn on_half_open(&self, instance_id: &str);
}
