use crate::model::ServiceKey;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-instance circuit state as seen by breakers and routing filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CircuitStatus {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CircuitStatus::Closed => "closed",
            CircuitStatus::Open => "open",
            CircuitStatus::HalfOpen => "half-open",
        })
    }
}

/// Circuit-breaker state published by a breaker chain.
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerUpdate {
    pub open: HashSet<String>,
    /// instance id -> remaining probe budget
    pub half_open: HashMap<String, u32>,
    pub version: u64,
}

/// Status of one named subset as judged by the set-level breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetStatus {
    Open,
    HalfOpen,
}

#[derive(Debug, Default)]
struct BreakerState {
    open: HashSet<String>,
    half_open: HashMap<String, u32>,
}

/// Mutable aggregate of a service's published data kinds: the circuit
/// breaker view, the set-breaker view and the dynamic-weight version.
///
/// The open set and the half-open map are disjoint; both versions strictly
/// increase on any mutation.
#[derive(Debug)]
pub struct Service {
    key: ServiceKey,
    id: u64,
    breaker: Mutex<BreakerState>,
    circuit_breaker_version: AtomicU64,
    set_unhealthy: Mutex<HashMap<String, SetStatus>>,
    set_breaker_version: AtomicU64,
    dynamic_weight_version: AtomicU64,
}

impl Service {
    pub fn new(key: ServiceKey, id: u64) -> Self {
        Self {
            key,
            id,
            breaker: Mutex::new(BreakerState::default()),
            circuit_breaker_version: AtomicU64::new(0),
            set_unhealthy: Mutex::new(HashMap::new()),
            set_breaker_version: AtomicU64::new(0),
            dynamic_weight_version: AtomicU64::new(0),
        }
    }

    pub fn key(&self) -> &ServiceKey {
        &self.key
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn circuit_breaker_version(&self) -> u64 {
        self.circuit_breaker_version.load(Ordering::Acquire)
    }

    pub fn set_breaker_version(&self) -> u64 {
        self.set_breaker_version.load(Ordering::Acquire)
    }

    pub fn dynamic_weight_version(&self) -> u64 {
        self.dynamic_weight_version.load(Ordering::Acquire)
    }

    pub fn commit_dynamic_weight_version(&self, version: u64) {
        self.dynamic_weight_version.fetch_max(version, Ordering::AcqRel);
    }

    /// Swaps the breaker view. The version only moves forward.
    pub fn set_circuit_breaker(&self, update: CircuitBreakerUpdate) {
        debug_assert!(update.half_open.keys().all(|id| !update.open.contains(id)));
        let mut state = self.breaker.lock().unwrap();
        state.open = update.open;
        state.half_open = update.half_open;
        self.circuit_breaker_version
            .fetch_max(update.version, Ordering::AcqRel);
    }

    pub fn open_instances(&self) -> HashSet<String> {
        self.breaker.lock().unwrap().open.clone()
    }

    pub fn half_open_instances(&self) -> HashSet<String> {
        self.breaker
            .lock()
            .unwrap()
            .half_open
            .keys()
            .cloned()
            .collect()
    }

    pub fn is_open(&self, instance_id: &str) -> bool {
        self.breaker.lock().unwrap().open.contains(instance_id)
    }

    /// Claims one probe slot for a half-open instance. Returns false once
    /// the budget is exhausted so only the configured number of probe calls
    /// go out per half-open round.
    pub fn try_half_open_probe(&self, instance_id: &str) -> bool {
        let mut state = self.breaker.lock().unwrap();
        match state.half_open.get_mut(instance_id) {
            Some(budget) if *budget > 0 => {
                *budget -= 1;
                true
            }
            _ => false,
        }
    }

    pub fn set_unhealthy_sets(&self, sets: HashMap<String, SetStatus>, version: u64) {
        *self.set_unhealthy.lock().unwrap() = sets;
        self.set_breaker_version.fetch_max(version, Ordering::AcqRel);
    }

    pub fn unhealthy_sets(&self) -> HashMap<String, SetStatus> {
        self.set_unhealthy.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_open_probe_budget() {
        let service = Service::new(ServiceKey::new("Test", "svc"), 1);
        let mut half_open = HashMap::new();
        half_open.insert("i-1".to_string(), 2);
        service.set_circuit_breaker(CircuitBreakerUpdate {
            open: HashSet::new(),
            half_open,
            version: 1,
        });
        assert!(service.try_half_open_probe("i-1"));
        assert!(service.try_half_open_probe("i-1"));
        assert!(!service.try_half_open_probe("i-1"));
        assert!(!service.try_half_open_probe("i-2"));
    }

    #[test]
    fn test_version_never_regresses() {
        let service = Service::new(ServiceKey::new("Test", "svc"), 1);
        service.set_circuit_breaker(CircuitBreakerUpdate {
            version: 5,
            ..Default::default()
        });
        service.set_circuit_breaker(CircuitBreakerUpdate {
            version: 3,
            ..Default::default()
        });
        assert_eq!(service.circuit_breaker_version(), 5);
    }
}
