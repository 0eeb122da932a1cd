use crate::error::{ApiError, descriptor, descriptor_count};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiOp {
    GetOneInstance,
    GetInstances,
    GetAllInstances,
    AsyncGetOneInstance,
    AsyncGetInstances,
    UpdateCallResult,
    InitService,
    GetRouteRule,
}

impl ApiOp {
    const COUNT: usize = 8;

    fn index(self) -> usize {
        match self {
            ApiOp::GetOneInstance => 0,
            ApiOp::GetInstances => 1,
            ApiOp::GetAllInstances => 2,
            ApiOp::AsyncGetOneInstance => 3,
            ApiOp::AsyncGetInstances => 4,
            ApiOp::UpdateCallResult => 5,
            ApiOp::InitService => 6,
            ApiOp::GetRouteRule => 7,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ApiOp::GetOneInstance => "get_one_instance",
            ApiOp::GetInstances => "get_instances",
            ApiOp::GetAllInstances => "get_all_instances",
            ApiOp::AsyncGetOneInstance => "async_get_one_instance",
            ApiOp::AsyncGetInstances => "async_get_instances",
            ApiOp::UpdateCallResult => "update_service_call_result",
            ApiOp::InitService => "init_service",
            ApiOp::GetRouteRule => "get_service_route_rule",
        }
    }
}

#[derive(Debug, Default)]
struct Cell {
    count: AtomicU64,
    total_latency_us: AtomicU64,
}

/// Per-(operation, return-code) call counters with accumulated latency.
#[derive(Debug)]
pub struct ApiStatRegistry {
    cells: Vec<Cell>,
    codes: usize,
}

impl Default for ApiStatRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiStatRegistry {
    pub fn new() -> Self {
        let codes = descriptor_count();
        let mut cells = Vec::with_capacity(ApiOp::COUNT * codes);
        cells.resize_with(ApiOp::COUNT * codes, Cell::default);
        Self { cells, codes }
    }

    pub fn record(&self, op: ApiOp, result: Option<ApiError>, latency_us: u64) {
        let cell = &self.cells[op.index() * self.codes + descriptor(result).stat_index];
        cell.count.fetch_add(1, Ordering::Relaxed);
        cell.total_latency_us.fetch_add(latency_us, Ordering::Relaxed);
    }

    pub fn count(&self, op: ApiOp, result: Option<ApiError>) -> u64 {
        self.cells[op.index() * self.codes + descriptor(result).stat_index]
            .count
            .load(Ordering::Relaxed)
    }
}

/// Records one API call: create at entry, call [`record`] with the outcome
/// before returning. Dropping without recording counts a success.
///
/// [`record`]: ApiStat::record
pub struct ApiStat<'a> {
    registry: &'a ApiStatRegistry,
    op: ApiOp,
    start: Instant,
    recorded: bool,
}

impl<'a> ApiStat<'a> {
    pub fn new(registry: &'a ApiStatRegistry, op: ApiOp) -> Self {
        Self {
            registry,
            op,
            start: Instant::now(),
            recorded: false,
        }
    }

    pub fn record(&mut self, result: Option<ApiError>) {
        self.recorded = true;
        self.registry
            .record(self.op, result, self.start.elapsed().as_micros() as u64);
    }
}

impl Drop for ApiStat<'_> {
    fn drop(&mut self) {
        if !self.recorded {
            self.registry
                .record(self.op, None, self.start.elapsed().as_micros() as u64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_read_back() {
        let registry = ApiStatRegistry::new();
        registry.record(ApiOp::GetOneInstance, None, 10);
        registry.record(ApiOp::GetOneInstance, Some(ApiError::Timeout), 10);
        registry.record(ApiOp::GetOneInstance, Some(ApiError::Timeout), 10);
        assert_eq!(registry.count(ApiOp::GetOneInstance, None), 1);
        assert_eq!(
            registry.count(ApiOp::GetOneInstance, Some(ApiError::Timeout)),
            2
        );
        assert_eq!(registry.count(ApiOp::GetInstances, None), 0);
    }

    #[test]
    fn test_stat_guard_records_success_by_default() {
        let registry = ApiStatRegistry::new();
        {
            let _stat = ApiStat::new(&registry, ApiOp::InitService);
        }
        assert_eq!(registry.count(ApiOp::InitService, None), 1);
    }
}
