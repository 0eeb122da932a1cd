use crate::model::constants;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Wire/persistence form of an instance, as replied by the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub id: String,
    pub host: String,
    pub port: u16,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub campus: String,
    #[serde(default = "default_healthy")]
    pub healthy: bool,
    #[serde(default)]
    pub isolated: bool,
    #[serde(default)]
    pub priority: u32,
}

fn default_weight() -> u32 {
    100
}

fn default_healthy() -> bool {
    true
}

/// One addressable member of a service. Immutable once obtained from a
/// published snapshot, except for the dynamic weight (slow-start ramp) and
/// the locality-aware feedback slot.
#[derive(Debug)]
pub struct Instance {
    id: String,
    host: String,
    port: u16,
    weight: u32,
    dynamic_weight: AtomicU32,
    metadata: BTreeMap<String, String>,
    region: String,
    zone: String,
    campus: String,
    healthy: bool,
    isolated: bool,
    priority: u32,
    // Opaque tag handed out by the locality-aware balancer; echoed back
    // through call results for feedback correlation.
    locality_tag: AtomicU64,
}

impl Instance {
    pub fn from_spec(spec: InstanceSpec) -> Self {
        Self {
            dynamic_weight: AtomicU32::new(spec.weight),
            id: spec.id,
            host: spec.host,
            port: spec.port,
            weight: spec.weight,
            metadata: spec.metadata,
            region: spec.region,
            zone: spec.zone,
            campus: spec.campus,
            healthy: spec.healthy,
            isolated: spec.isolated,
            priority: spec.priority,
            locality_tag: AtomicU64::new(0),
        }
    }

    pub fn to_spec(&self) -> InstanceSpec {
        InstanceSpec {
            id: self.id.clone(),
            host: self.host.clone(),
            port: self.port,
            weight: self.weight,
            metadata: self.metadata.clone(),
            region: self.region.clone(),
            zone: self.zone.clone(),
            campus: self.campus.clone(),
            healthy: self.healthy,
            isolated: self.isolated,
            priority: self.priority,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Static weight from the control plane.
    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// Current effective weight; equals the static weight outside a
    /// slow-start window.
    pub fn dynamic_weight(&self) -> u32 {
        self.dynamic_weight.load(Ordering::Relaxed)
    }

    pub(crate) fn set_dynamic_weight(&self, weight: u32) {
        self.dynamic_weight.store(weight, Ordering::Relaxed);
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    pub fn campus(&self) -> &str {
        &self.campus
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    pub fn is_isolated(&self) -> bool {
        self.isolated
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn canary(&self) -> Option<&str> {
        self.metadata.get(constants::CANARY_KEY).map(String::as_str)
    }

    /// `name.area.group` set name, when the instance participates in set
    /// routing.
    pub fn set_name(&self) -> Option<&str> {
        self.metadata
            .get(constants::SET_NAME_KEY)
            .map(String::as_str)
            .filter(|name| !name.is_empty())
    }

    pub fn set_enabled(&self) -> bool {
        self.metadata
            .get(constants::ENABLE_SET_KEY)
            .is_some_and(|v| v.eq_ignore_ascii_case("y"))
    }

    pub fn locality_tag(&self) -> u64 {
        self.locality_tag.load(Ordering::Relaxed)
    }

    pub(crate) fn set_locality_tag(&self, tag: u64) {
        self.locality_tag.store(tag, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str) -> InstanceSpec {
        InstanceSpec {
            id: id.into(),
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
        }
    }

    #[test]
    fn test_dynamic_weight_starts_at_static() {
        let instance = Instance::from_spec(spec("i-1"));
        assert_eq!(instance.dynamic_weight(), instance.weight());
        instance.set_dynamic_weight(10);
        assert_eq!(instance.dynamic_weight(), 10);
        assert_eq!(instance.weight(), 100);
    }

    #[test]
    fn test_set_enabled_is_case_insensitive() {
        let mut s = spec("i-1");
        s.metadata
            .insert(constants::ENABLE_SET_KEY.into(), "y".into());
        s.metadata
            .insert(constants::SET_NAME_KEY.into(), "app.sz.1".into());
        let instance = Instance::from_spec(s);
        assert!(instance.set_enabled());
        assert_eq!(instance.set_name(), Some("app.sz.1"));
    }
}
