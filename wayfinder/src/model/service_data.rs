use crate::model::constants;
use crate::model::{
    DataKind, Instance, InstanceSpec, InstancesSet, RouteReply, RouteRuleData, Service, ServiceKey,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock, Weak};

/// Sync status of one `(service, kind)` entry.
///
/// Ordering matters: anything below `Syncing` has not been confirmed by the
/// control plane yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DataStatus {
    Initializing,
    InitFromDisk,
    Syncing,
    NotFound,
}

/// Control-plane reply for the `Instances` data kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstancesReply {
    #[serde(default)]
    pub revision: String,
    #[serde(default)]
    pub service_metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub instances: Vec<InstanceSpec>,
}

/// Parsed, indexed form of an instances reply.
#[derive(Debug)]
pub struct InstancesData {
    pub service_metadata: BTreeMap<String, String>,
    pub nearby_enabled: bool,
    pub canary_enabled: bool,
    /// Selectable instances (isolated and zero-weight members excluded).
    instances: Vec<Arc<Instance>>,
    isolated: Vec<Arc<Instance>>,
    by_id: HashMap<String, Arc<Instance>>,
    by_host_port: HashMap<(String, u16), String>,
    /// Built once so the pipeline's first input has a stable identity.
    full_set: OnceLock<Arc<InstancesSet>>,
}

impl InstancesData {
    fn from_reply(reply: &InstancesReply) -> Self {
        let mut instances = Vec::new();
        let mut isolated = Vec::new();
        let mut by_id = HashMap::new();
        let mut by_host_port = HashMap::new();
        for spec in &reply.instances {
            let instance = Arc::new(Instance::from_spec(spec.clone()));
            by_id.insert(instance.id().to_string(), Arc::clone(&instance));
            by_host_port.insert(
                (instance.host().to_string(), instance.port()),
                instance.id().to_string(),
            );
            if instance.is_isolated() || instance.weight() == 0 {
                isolated.push(instance);
            } else {
                instances.push(instance);
            }
        }
        let meta_true = |key: &str| {
            reply
                .service_metadata
                .get(key)
                .is_some_and(|v| v.eq_ignore_ascii_case("true"))
        };
        Self {
            nearby_enabled: meta_true(constants::NEARBY_ENABLE_KEY),
            canary_enabled: meta_true(constants::CANARY_ENABLE_KEY),
            service_metadata: reply.service_metadata.clone(),
            instances,
            isolated,
            by_id,
            by_host_port,
            full_set: OnceLock::new(),
        }
    }

    pub fn instances(&self) -> &[Arc<Instance>] {
        &self.instances
    }

    pub fn isolated(&self) -> &[Arc<Instance>] {
        &self.isolated
    }

    pub fn by_id(&self, id: &str) -> Option<&Arc<Instance>> {
        self.by_id.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn id_by_host_port(&self, host: &str, port: u16) -> Option<&str> {
        self.by_host_port
            .get(&(host.to_string(), port))
            .map(String::as_str)
    }

    pub fn full_set(&self) -> Arc<InstancesSet> {
        Arc::clone(
            self.full_set
                .get_or_init(|| Arc::new(InstancesSet::new(self.instances.clone()))),
        )
    }

    fn to_reply(&self, revision: &str) -> InstancesReply {
        InstancesReply {
            revision: revision.to_string(),
            service_metadata: self.service_metadata.clone(),
            instances: self
                .instances
                .iter()
                .chain(self.isolated.iter())
                .map(|i| i.to_spec())
                .collect(),
        }
    }
}

#[derive(Debug)]
pub enum DataPayload {
    Instances(InstancesData),
    RouteRule(RouteRuleData),
    RateLimit(serde_json::Value),
    CircuitBreakerConfig(serde_json::Value),
    /// Control plane reported the service absent for this kind.
    Absent,
}

/// An immutable snapshot of one `(service, kind)`. Replacement publishes a
/// new object; the registry retires the old one.
#[derive(Debug)]
pub struct ServiceData {
    key: ServiceKey,
    kind: DataKind,
    revision: String,
    status: DataStatus,
    payload: DataPayload,
    service: OnceLock<Weak<Service>>,
}

impl ServiceData {
    pub fn from_instances(key: ServiceKey, reply: &InstancesReply, status: DataStatus) -> Arc<Self> {
        Arc::new(Self {
            key,
            kind: DataKind::Instances,
            revision: reply.revision.clone(),
            status,
            payload: DataPayload::Instances(InstancesData::from_reply(reply)),
            service: OnceLock::new(),
        })
    }

    pub fn from_route_rule(key: ServiceKey, reply: &RouteReply, status: DataStatus) -> Arc<Self> {
        Arc::new(Self {
            key,
            kind: DataKind::RouteRule,
            revision: reply.revision.clone(),
            status,
            payload: DataPayload::RouteRule(RouteRuleData::from_reply(reply)),
            service: OnceLock::new(),
        })
    }

    pub fn from_value(
        key: ServiceKey,
        kind: DataKind,
        revision: String,
        value: serde_json::Value,
        status: DataStatus,
    ) -> Arc<Self> {
        let payload = match kind {
            DataKind::RateLimit => DataPayload::RateLimit(value),
            _ => DataPayload::CircuitBreakerConfig(value),
        };
        Arc::new(Self {
            key,
            kind,
            revision,
            status,
            payload,
            service: OnceLock::new(),
        })
    }

    pub fn not_found(key: ServiceKey, kind: DataKind) -> Arc<Self> {
        Arc::new(Self {
            key,
            kind,
            revision: String::new(),
            status: DataStatus::NotFound,
            payload: DataPayload::Absent,
            service: OnceLock::new(),
        })
    }

    /// Reparses a persisted reply. `None` when the payload does not decode
    /// as the expected kind.
    pub fn from_persisted(
        key: ServiceKey,
        kind: DataKind,
        payload: &serde_json::Value,
    ) -> Option<Arc<Self>> {
        match kind {
            DataKind::Instances => {
                let reply: InstancesReply = serde_json::from_value(payload.clone()).ok()?;
                Some(Self::from_instances(key, &reply, DataStatus::InitFromDisk))
            }
            DataKind::RouteRule => {
                let reply: RouteReply = serde_json::from_value(payload.clone()).ok()?;
                Some(Self::from_route_rule(key, &reply, DataStatus::InitFromDisk))
            }
            DataKind::RateLimit | DataKind::CircuitBreakerConfig => {
                let revision = payload
                    .get("revision")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                Some(Self::from_value(
                    key,
                    kind,
                    revision,
                    payload.clone(),
                    DataStatus::InitFromDisk,
                ))
            }
        }
    }

    pub fn service_key(&self) -> &ServiceKey {
        &self.key
    }

    pub fn kind(&self) -> DataKind {
        self.kind
    }

    pub fn revision(&self) -> &str {
        &self.revision
    }

    pub fn status(&self) -> DataStatus {
        self.status
    }

    pub fn is_synced(&self) -> bool {
        self.status == DataStatus::Syncing
    }

    pub fn is_available(&self, allow_disk: bool) -> bool {
        match self.status {
            DataStatus::Syncing | DataStatus::NotFound => true,
            DataStatus::InitFromDisk => allow_disk,
            DataStatus::Initializing => false,
        }
    }

    pub(crate) fn attach_service(&self, service: &Arc<Service>) {
        let _ = self.service.set(Arc::downgrade(service));
    }

    pub fn service(&self) -> Option<Arc<Service>> {
        self.service.get().and_then(Weak::upgrade)
    }

    pub fn instances(&self) -> Option<&InstancesData> {
        match &self.payload {
            DataPayload::Instances(data) => Some(data),
            _ => None,
        }
    }

    pub fn route_rule(&self) -> Option<&RouteRuleData> {
        match &self.payload {
            DataPayload::RouteRule(data) => Some(data),
            _ => None,
        }
    }

    /// Reply-shaped JSON used for persistence and the route-rule query API.
    pub fn to_reply_json(&self) -> serde_json::Value {
        match &self.payload {
            DataPayload::Instances(data) => {
                serde_json::to_value(data.to_reply(&self.revision)).unwrap_or_default()
            }
            DataPayload::RouteRule(data) => {
                serde_json::to_value(data.to_reply(&self.revision)).unwrap_or_default()
            }
            DataPayload::RateLimit(value) | DataPayload::CircuitBreakerConfig(value) => {
                value.clone()
            }
            DataPayload::Absent => serde_json::Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(revision: &str, ids: &[&str]) -> InstancesReply {
        InstancesReply {
            revision: revision.into(),
            service_metadata: BTreeMap::new(),
            instances: ids
                .iter()
                .map(|id| InstanceSpec {
                    id: id.to_string(),
                    host: format!("10.0.0.{}", ids.iter().position(|x| x == id).unwrap() + 1),
                    port: 8000,
                    weight: 100,
                    metadata: BTreeMap::new(),
                    region: String::new(),
                    zone: String::new(),
                    campus: String::new(),
                    healthy: true,
                    isolated: false,
                    priority: 0,
                })
                .collect(),
        }
    }

    #[test]
    fn test_full_set_identity_is_stable() {
        let data = ServiceData::from_instances(
            ServiceKey::new("Test", "svc"),
            &reply("v1", &["a", "b"]),
            DataStatus::Syncing,
        );
        let instances = data.instances().unwrap();
        let first = instances.full_set();
        let second = instances.full_set();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_isolated_instances_are_not_selectable() {
        let mut r = reply("v1", &["a", "b"]);
        r.instances[1].isolated = true;
        let data = ServiceData::from_instances(
            ServiceKey::new("Test", "svc"),
            &r,
            DataStatus::Syncing,
        );
        let instances = data.instances().unwrap();
        assert_eq!(instances.instances().len(), 1);
        assert_eq!(instances.isolated().len(), 1);
        assert!(instances.contains("b"));
    }

    #[test]
    fn test_persisted_roundtrip() {
        let data = ServiceData::from_instances(
            ServiceKey::new("Test", "svc"),
            &reply("v7", &["a"]),
            DataStatus::Syncing,
        );
        let json = data.to_reply_json();
        let reloaded =
            ServiceData::from_persisted(ServiceKey::new("Test", "svc"), DataKind::Instances, &json)
                .unwrap();
        assert_eq!(reloaded.revision(), "v7");
        assert_eq!(reloaded.status(), DataStatus::InitFromDisk);
        assert!(reloaded.instances().unwrap().contains("a"));
    }
}
