mod control_plane;

pub use control_plane::*;

use std::collections::BTreeMap;
use wayfinder::model::InstanceSpec;

pub fn meta(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub struct InstanceSpecBuilder {
    spec: InstanceSpec,
}

impl InstanceSpecBuilder {
    pub fn new(id: &str, host: &str, port: u16) -> Self {
        Self {
            spec: InstanceSpec {
                id: id.to_string(),
                host: host.to_string(),
                port,
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

    pub fn weight(mut self, weight: u32) -> Self {
        self.spec.weight = weight;
        self
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
