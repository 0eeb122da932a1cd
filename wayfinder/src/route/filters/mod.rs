mod canary;
mod metadata;
mod nearby;
mod rule;
mod set_division;

pub use canary::*;
pub use metadata::*;
pub use nearby::*;
pub use rule::*;
pub use set_division::*;

use crate::error::ApiResult;
use crate::model::{InstancesSet, ServiceKey};
use crate::monitor::{MonitorSink, RecoverAllRecord};
use crate::route::{ClearableCache, RouteInfo};
use std::sync::Arc;

/// One stage of the route pipeline. Consumes the current available set and
/// replaces it with a (possibly shrunk) one.
pub trait RouteFilter: Send + Sync {
    fn name(&self) -> &'static str;

    /// This filter's slot in the per-call enable mask.
    fn bit(&self) -> u8;

    fn filter(&self, route_info: &mut RouteInfo) -> ApiResult<()>;

    /// The filter's memo, handed to the sweeper.
    fn clearable(&self) -> Arc<dyn ClearableCache>;
}

/// Reports recover-all start/stop exactly once per edge, racing through the
/// CAS on the input set's flag.
pub(crate) fn report_recover_edge(
    monitor: &Arc<dyn MonitorSink>,
    key: &ServiceKey,
    prior: &Arc<InstancesSet>,
    recover_all: bool,
    info: &str,
) {
    if recover_all {
        if prior.swap_recover_all(false, true) {
            monitor.recover_all(key, &RecoverAllRecord::now(info, true));
        }
    } else if prior.swap_recover_all(true, false) {
        monitor.recover_all(key, &RecoverAllRecord::now(info, false));
    }
}
