use crate::cache::clock;
use crate::model::{DataKind, DataStatus, Location, ServiceData, ServiceKey};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct PersistConfig {
    pub dir: PathBuf,
    /// Files with a sync time older than this are ignored by readers.
    pub available_time: Duration,
    pub max_write_retry: u32,
    pub retry_interval: Duration,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./wayfinder/backup"),
            available_time: Duration::from_secs(600),
            max_write_retry: 1,
            retry_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedService {
    revision: String,
    /// Wallclock ms of the last successful control-plane sync.
    sync_time_ms: u64,
    saved_at: String,
    payload: serde_json::Value,
}

/// Read/write of service snapshots and the client location to a directory.
/// Partial or corrupt files are skipped, never fatal; writes run on a
/// background executor and retry with an interval.
#[derive(Debug)]
pub struct PersistStore {
    config: PersistConfig,
}

impl PersistStore {
    pub fn new(config: PersistConfig) -> Self {
        Self { config }
    }

    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    fn service_path(&self, key: &ServiceKey, kind: DataKind) -> PathBuf {
        self.config.dir.join(format!(
            "svc#{}#{}#{}.json",
            sanitize(&key.namespace),
            sanitize(&key.name),
            kind.as_str()
        ))
    }

    fn location_path(&self) -> PathBuf {
        self.config.dir.join("location.json")
    }

    /// Loads a snapshot, returning `None` for missing, corrupt, wrong-kind
    /// or stale files.
    pub fn load_service(&self, key: &ServiceKey, kind: DataKind) -> Option<Arc<ServiceData>> {
        let path = self.service_path(key, kind);
        let raw = std::fs::read_to_string(&path).ok()?;
        let record: PersistedService = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(err) => {
                warn!(path = %path.display(), %err, "ignoring corrupt persisted service file");
                return None;
            }
        };
        let age_ms = clock::system_ms().saturating_sub(record.sync_time_ms);
        if age_ms > self.config.available_time.as_millis() as u64 {
            debug!(service = %key, %kind, age_ms, "persisted data too old, ignoring");
            return None;
        }
        let data = ServiceData::from_persisted(key.clone(), kind, &record.payload);
        if data.is_none() {
            warn!(path = %path.display(), "persisted payload does not decode, ignoring");
        }
        data
    }

    /// Persists a snapshot. Disk-loaded data never goes back to disk.
    pub fn save_service(&self, data: &ServiceData) {
        if data.status() == DataStatus::InitFromDisk {
            return;
        }
        if data.status() == DataStatus::NotFound {
            self.delete_service(data.service_key(), data.kind());
            return;
        }
        let record = PersistedService {
            revision: data.revision().to_string(),
            sync_time_ms: clock::system_ms(),
            saved_at: chrono::Utc::now().to_rfc3339(),
            payload: data.to_reply_json(),
        };
        let path = self.service_path(data.service_key(), data.kind());
        self.write_with_retry(&path, &record);
    }

    pub fn delete_service(&self, key: &ServiceKey, kind: DataKind) {
        let path = self.service_path(key, kind);
        if let Err(err) = std::fs::remove_file(&path)
            && err.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %path.display(), %err, "failed to delete persisted service file");
        }
    }

    /// Refreshes the stored sync time so an unchanged revision stays
    /// available, without rebuilding the payload from the live snapshot.
    pub fn touch_sync_time(&self, key: &ServiceKey, kind: DataKind) {
        let path = self.service_path(key, kind);
        let Ok(raw) = std::fs::read_to_string(&path) else {
            return;
        };
        let Ok(mut record) = serde_json::from_str::<PersistedService>(&raw) else {
            return;
        };
        record.sync_time_ms = clock::system_ms();
        self.write_with_retry(&path, &record);
    }

    pub fn load_location(&self) -> Option<Location> {
        let raw = std::fs::read_to_string(self.location_path()).ok()?;
        serde_json::from_str(&raw).ok()
    }

    pub fn save_location(&self, location: &Location) {
        let path = self.location_path();
        match serde_json::to_string_pretty(location) {
            Ok(body) => {
                if let Err(err) = write_atomic(&path, body.as_bytes()) {
                    warn!(path = %path.display(), %err, "failed to persist client location");
                }
            }
            Err(err) => warn!(%err, "failed to serialize client location"),
        }
    }

    fn write_with_retry(&self, path: &Path, record: &PersistedService) {
        let body = match serde_json::to_vec_pretty(record) {
            Ok(body) => body,
            Err(err) => {
                warn!(path = %path.display(), %err, "failed to serialize persisted service");
                return;
            }
        };
        let mut attempt = 0;
        loop {
            match write_atomic(path, &body) {
                Ok(()) => return,
                Err(err) => {
                    attempt += 1;
                    if attempt > self.config.max_write_retry {
                        warn!(path = %path.display(), %err, attempt, "giving up persisting service data");
                        return;
                    }
                    std::thread::sleep(self.config.retry_interval);
                }
            }
        }
    }
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| if c == '#' || c == '/' || c == '\\' { '_' } else { c })
        .collect()
}

fn write_atomic(path: &Path, body: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, body)?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InstanceSpec, InstancesReply};
    use std::collections::BTreeMap;

    fn store(dir: &Path) -> PersistStore {
        PersistStore::new(PersistConfig {
            dir: dir.to_path_buf(),
            available_time: Duration::from_secs(600),
            max_write_retry: 1,
            retry_interval: Duration::from_millis(10),
        })
    }

    fn sample_data(revision: &str) -> Arc<ServiceData> {
        ServiceData::from_instances(
            ServiceKey::new("Test", "svc.a"),
            &InstancesReply {
                revision: revision.into(),
                service_metadata: BTreeMap::new(),
                instances: vec![InstanceSpec {
                    id: "i-1".into(),
                    host: "10.0.0.1".into(),
                    port: 8000,
                    weight: 100,
                    metadata: BTreeMap::new(),
                    region: String::new(),
                    zone: String::new(),
                    campus: String::new(),
                    healthy: true,
                    isolated: false,
                    priority: 0,
                }],
            },
            DataStatus::Syncing,
        )
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let key = ServiceKey::new("Test", "svc.a");
        store.save_service(&sample_data("v3"));
        let loaded = store.load_service(&key, DataKind::Instances).unwrap();
        assert_eq!(loaded.revision(), "v3");
        assert_eq!(loaded.status(), DataStatus::InitFromDisk);
    }

    #[test]
    fn test_corrupt_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let key = ServiceKey::new("Test", "svc.a");
        let path = store.service_path(&key, DataKind::Instances);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{not json").unwrap();
        assert!(store.load_service(&key, DataKind::Instances).is_none());
    }

    #[test]
    fn test_stale_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = PersistStore::new(PersistConfig {
            dir: dir.path().to_path_buf(),
            available_time: Duration::from_millis(0),
            max_write_retry: 1,
            retry_interval: Duration::from_millis(10),
        });
        let key = ServiceKey::new("Test", "svc.a");
        store.save_service(&sample_data("v1"));
        std::thread::sleep(Duration::from_millis(5));
        assert!(store.load_service(&key, DataKind::Instances).is_none());
    }

    #[test]
    fn test_not_found_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let key = ServiceKey::new("Test", "svc.a");
        store.save_service(&sample_data("v1"));
        store.save_service(&ServiceData::not_found(key.clone(), DataKind::Instances));
        assert!(store.load_service(&key, DataKind::Instances).is_none());
    }

    #[test]
    fn test_location_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        assert!(store.load_location().is_none());
        let location = Location {
            region: "south".into(),
            zone: "sz".into(),
            campus: "c1".into(),
        };
        store.save_location(&location);
        assert_eq!(store.load_location(), Some(location));
    }
}
