
use crate::error::ApiResult;
use crate::model::{DataKind, Location, ServiceData, ServiceKey};
use crate::registry::{DataFetcher, EventHandler};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A control plane the tests drive by hand: `push` delivers an update
/// through the handler the store registered.
#[derive(Default)]
pub struct MockFetcher {
    handlers: Mutex<HashMap<(ServiceKey, DataKind), Arc<dyn EventHandler>>>,
    pub deregistered: Mutex<Vec<(ServiceKey, DataKind)>>,
    pub location: Mutex<Option<Location>>,
}

impl MockFetcher {
    pub fn push(&self, key: &ServiceKey, kind: DataKind, data: Option<Arc<ServiceData>>) {
        let handler = self
            .handlers
            .lock()
            .unwrap()
            .get(&(key.clone(), kind))
            .cloned();
        if let Some(handler) = handler {
            handler.on_update(key, kind, data);
        }
    }

    pub fn sync(&self, key: &ServiceKey, kind: DataKind) {
        let handler = self
            .handlers
            .lock()
            .unwrap()
            .get(&(key.clone(), kind))
            .cloned();
        if let Some(handler) = handler {
            handler.on_sync(key, kind);
        }
    }

    pub fn is_registered(&self, key: &ServiceKey, kind: DataKind) -> bool {
        self.handlers
            .lock()
            .unwrap()
            .contains_key(&(key.clone(), kind))
    }
}

impl DataFetcher for MockFetcher {
    fn register(
        &self,
        key: &ServiceKey,
        kind: DataKind,
        _refresh_interval: Duration,
        handler: Arc<dyn EventHandler>,
    ) {
        self.handlers
            .lock()
            .unwrap()
            .insert((key.clone(), kind), handler);
    }

    fn deregister(&self, key: &ServiceKey, kind: DataKind) {
        self.handlers.lock().unwrap().remove(&(key.clone(), kind));
        self.deregistered
            .lock()
            .unwrap()
            .push((key.clone(), kind));
    }

    fn report_client(&self, _bind_ip: &str, _timeout: Duration) -> ApiResult<Location> {
        self.location
            .lock()
            .unwrap()
            .clone()
            .ok_or(crate::error::ApiError::NetworkFailed)
    }
}
