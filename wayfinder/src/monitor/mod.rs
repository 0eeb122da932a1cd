mod api_stat;

pub use api_stat::*;

use crate::cache::clock;
use crate::model::{CircuitStatus, DataKind, ServiceKey};
use std::sync::Mutex;
use tracing::info;

/// One accepted circuit transition for an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitChangeRecord {
    pub change_time_ms: u64,
    pub seq: u64,
    pub from: CircuitStatus,
    pub to: CircuitStatus,
    /// Name of the plugin that drove the transition.
    pub reason: String,
}

/// One recover-all policy edge for a `(service, subset)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoverAllRecord {
    pub time_ms: u64,
    /// Human-readable cause: location, canary value, filter name.
    pub info: String,
    pub begin: bool,
}

impl RecoverAllRecord {
    pub fn now(info: impl Into<String>, begin: bool) -> Self {
        Self {
            time_ms: clock::system_ms(),
            info: info.into(),
            begin,
        }
    }
}

/// Collector for service-governance events. The default sink logs; tests
/// install a recording sink.
pub trait MonitorSink: Send + Sync {
    fn circuit_change(&self, key: &ServiceKey, instance_id: &str, record: &CircuitChangeRecord);

    fn recover_all(&self, key: &ServiceKey, record: &RecoverAllRecord);

    fn service_data_updated(&self, key: &ServiceKey, kind: DataKind, revision: &str);

    fn service_data_deleted(&self, key: &ServiceKey, kind: DataKind);
}

/// Default sink: structured logs only.
#[derive(Debug, Default)]
pub struct LogSink;

impl MonitorSink for LogSink {
    fn circuit_change(&self, key: &ServiceKey, instance_id: &str, record: &CircuitChangeRecord) {
        info!(
            service = %key,
            instance = instance_id,
            from = %record.from,
            to = %record.to,
            reason = record.reason,
            "circuit breaker status changed"
        );
    }

    fn recover_all(&self, key: &ServiceKey, record: &RecoverAllRecord) {
        info!(
            service = %key,
            info = record.info,
            begin = record.begin,
            "recover-all transition"
        );
    }

    fn service_data_updated(&self, key: &ServiceKey, kind: DataKind, revision: &str) {
        info!(service = %key, %kind, revision, "service data updated");
    }

    fn service_data_deleted(&self, key: &ServiceKey, kind: DataKind) {
        info!(service = %key, %kind, "service data deleted");
    }
}

/// In-memory sink used by tests to assert on emitted events.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub circuit_changes: Mutex<Vec<(ServiceKey, String, CircuitChangeRecord)>>,
    pub recover_alls: Mutex<Vec<(ServiceKey, RecoverAllRecord)>>,
    pub data_updates: Mutex<Vec<(ServiceKey, DataKind, String)>>,
    pub data_deletes: Mutex<Vec<(ServiceKey, DataKind)>>,
}

impl MonitorSink for RecordingSink {
    fn circuit_change(&self, key: &ServiceKey, instance_id: &str, record: &CircuitChangeRecord) {
        self.circuit_changes.lock().unwrap().push((
            key.clone(),
            instance_id.to_string(),
            record.clone(),
        ));
    }

    fn recover_all(&self, key: &ServiceKey, record: &RecoverAllRecord) {
        self.recover_alls
            .lock()
            .unwrap()
            .push((key.clone(), record.clone()));
    }

    fn service_data_updated(&self, key: &ServiceKey, kind: DataKind, revision: &str) {
        self.data_updates
            .lock()
            .unwrap()
            .push((key.clone(), kind, revision.to_string()));
    }

    fn service_data_deleted(&self, key: &ServiceKey, kind: DataKind) {
        self.data_deletes.lock().unwrap().push((key.clone(), kind));
    }
}
