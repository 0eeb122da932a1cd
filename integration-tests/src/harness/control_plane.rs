use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wayfinder::error::{ApiError, ApiResult};
use wayfinder::model::{
    DataKind, DataStatus, InstanceSpec, InstancesReply, Location, RouteReply, ServiceData,
    ServiceKey,
};
use wayfinder::registry::{DataFetcher, EventHandler};

type Registration = (ServiceKey, DataKind);

/// An in-process control plane. Seeded replies are delivered on a helper
/// thread shortly after a subscription lands, mimicking the real connector;
/// unseeded kinds answer with an explicit not-found. Tests can also push
/// updates by hand mid-run.
#[derive(Default)]
pub struct MockControlPlane {
    seeded: Mutex<HashMap<Registration, serde_json::Value>>,
    handlers: Mutex<HashMap<Registration, Arc<dyn EventHandler>>>,
    push_delay: Mutex<Duration>,
    location: Mutex<Option<Location>>,
}

impl MockControlPlane {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_push_delay(&self, delay: Duration) {
        *self.push_delay.lock().unwrap() = delay;
    }

    pub fn set_location(&self, location: Location) {
        *self.location.lock().unwrap() = Some(location);
    }

    pub fn seed_instances(
        &self,
        key: &ServiceKey,
        revision: &str,
        service_metadata: BTreeMap<String, String>,
        instances: Vec<InstanceSpec>,
    ) {
        let reply = InstancesReply {
            revision: revision.to_string(),
            service_metadata,
            instances,
        };
        self.seeded.lock().unwrap().insert(
            (key.clone(), DataKind::Instances),
            serde_json::to_value(reply).unwrap(),
        );
    }

    pub fn seed_route_rule(&self, key: &ServiceKey, reply: RouteReply) {
        self.seeded.lock().unwrap().insert(
            (key.clone(), DataKind::RouteRule),
            serde_json::to_value(reply).unwrap(),
        );
    }

    fn build_reply(&self, key: &ServiceKey, kind: DataKind) -> Option<Arc<ServiceData>> {
        let payload = self
            .seeded
            .lock()
            .unwrap()
            .get(&(key.clone(), kind))?
            .clone();
        match kind {
            DataKind::Instances => {
                let reply: InstancesReply = serde_json::from_value(payload).ok()?;
                Some(ServiceData::from_instances(
                    key.clone(),
                    &reply,
                    DataStatus::Syncing,
                ))
            }
            DataKind::RouteRule => {
                let reply: RouteReply = serde_json::from_value(payload).ok()?;
                Some(ServiceData::from_route_rule(
                    key.clone(),
                    &reply,
                    DataStatus::Syncing,
                ))
            }
            DataKind::RateLimit | DataKind::CircuitBreakerConfig => Some(ServiceData::from_value(
                key.clone(),
                kind,
                String::new(),
                payload,
                DataStatus::Syncing,
            )),
        }
    }

    /// Re-announces the seeded snapshot for a service, as a refresh cycle
    /// would.
    pub fn push(&self, key: &ServiceKey, kind: DataKind) {
        let handler = self
            .handlers
            .lock()
            .unwrap()
            .get(&(key.clone(), kind))
            .cloned();
        if let Some(handler) = handler {
            let data = self
                .build_reply(key, kind)
                .unwrap_or_else(|| ServiceData::not_found(key.clone(), kind));
            handler.on_update(key, kind, Some(data));
        }
    }

    /// Announces the service gone, as the connector does on deregistration.
    pub fn push_gone(&self, key: &ServiceKey, kind: DataKind) {
        let handler = self
            .handlers
            .lock()
            .unwrap()
            .get(&(key.clone(), kind))
            .cloned();
        if let Some(handler) = handler {
            handler.on_update(key, kind, None);
        }
    }
}

impl DataFetcher for MockControlPlane {
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
            .insert((key.clone(), kind), Arc::clone(&handler));

        let delay = *self.push_delay.lock().unwrap();
        let data = self
            .build_reply(key, kind)
            .unwrap_or_else(|| ServiceData::not_found(key.clone(), kind));
        let key = key.clone();
        std::thread::spawn(move || {
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            handler.on_update(&key, kind, Some(data));
        });
    }

    fn deregister(&self, key: &ServiceKey, kind: DataKind) {
        self.handlers.lock().unwrap().remove(&(key.clone(), kind));
    }

    fn report_client(&self, _bind_ip: &str, _timeout: Duration) -> ApiResult<Location> {
        self.location
            .lock()
            .unwrap()
            .clone()
            .ok_or(ApiError::NetworkFailed)
    }
}
