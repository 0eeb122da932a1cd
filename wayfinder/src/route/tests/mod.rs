mod set_division_tests;

use crate::model::*;
use crate::route::{RouteInfo, SourceService};
use std::collections::BTreeMap;
use std::sync::Arc;

pub fn meta(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub struct InstanceBuilder {
    spec: InstanceSpec,
}

impl InstanceBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            spec: InstanceSpec {
                id: id.to_string(),
                host: format!("host-{id}"),
                port: 8000,
                weight: 100,
                metadata: BTreeMap::new(),
                region: String::new(),
                zone: String::new(),
                campus: String::new(),
                healthy: true,
                isolated: false,
                priority: 0,
            },
        }
    }

    pub fn locality(mut self, region: &str, zone: &str, campus: &str) -> Self {
        self.spec.region = region.to_string();
        self.spec.zone = zone.to_string();
        self.spec.campus = campus.to_string();
        self
    }

    pub fn metadata(mut self, pairs: &[(&str, &str)]) -> Self {
        self.spec.metadata = meta(pairs);
        self
    }

    pub fn unhealthy(mut self) -> Self {
        self.spec.healthy = false;
        self
    }

    pub fn build(self) -> InstanceSpec {
        self.spec
    }
}

/// Builds a published-looking snapshot with its service aggregate attached.
pub fn make_service_data(
    key: &ServiceKey,
    service_metadata: BTreeMap<String, String>,
    specs: Vec<InstanceSpec>,
) -> (Arc<ServiceData>, Arc<Service>) {
    let reply = InstancesReply {
        revision: "v1".to_string(),
        service_metadata,
        instances: specs,
    };
    let data = ServiceData::from_instances(key.clone(), &reply, DataStatus::Syncing);
    let service = Arc::new(Service::new(key.clone(), 1));
    data.attach_service(&service);
    (data, service)
}

pub fn route_info_with(
    key: &ServiceKey,
    data: &Arc<ServiceData>,
    service: &Arc<Service>,
    source: Option<SourceService>,
) -> RouteInfo {
    let mut info = RouteInfo::new(key.clone(), source);
    let instances = ServiceInstances::new(Arc::clone(data), Arc::clone(service)).unwrap();
    info.set_service_instances(instances);
    info
}

pub fn result_ids(info: &RouteInfo) -> Vec<String> {
    info.service_instances()
        .unwrap()
        .available()
        .instances()
        .iter()
        .map(|instance| instance.id().to_string())
        .collect()
}

pub fn open_instances(service: &Arc<Service>, ids: &[&str], version: u64) {
    let mut update = CircuitBreakerUpdate {
        version,
        ..Default::default()
    };
    for id in ids {
        update.open.insert(id.to_string());
    }
    service.set_circuit_breaker(update);
}
