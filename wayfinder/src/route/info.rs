use crate::error::{ApiError, ApiResult};
use crate::model::{
    DataKind, DataStatus, ServiceData, ServiceInstances, ServiceKey,
};
use crate::registry::ServiceDataNotify;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// Filter slots for the per-call enable mask. Set-division may switch the
/// nearby filter off for the remainder of one call.
pub mod router_bit {
    pub const RULE: u8 = 1 << 0;
    pub const NEARBY: u8 = 1 << 1;
    pub const SET_DIVISION: u8 = 1 << 2;
    pub const CANARY: u8 = 1 << 3;
    pub const METADATA: u8 = 1 << 4;
    pub const ALL: u8 = RULE | NEARBY | SET_DIVISION | CANARY | METADATA;
}

/// The calling service's identity and attached metadata.
#[derive(Debug, Clone, Default)]
pub struct SourceService {
    pub service: Option<ServiceKey>,
    pub metadata: BTreeMap<String, String>,
}

/// Fallback behaviour of the metadata filter when nothing matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetadataFailover {
    #[default]
    None,
    All,
    NotKey,
}

impl MetadataFailover {
    pub fn as_str(self) -> &'static str {
        match self {
            MetadataFailover::None => "none",
            MetadataFailover::All => "all",
            MetadataFailover::NotKey => "not-key",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetadataParam {
    pub metadata: BTreeMap<String, String>,
    pub failover: MetadataFailover,
}

/// The per-call mutable routing-inputs bundle. Carries the prepared data
/// snapshots through the pipeline; drops its references when it goes away.
#[derive(Debug)]
pub struct RouteInfo {
    service_key: ServiceKey,
    source: Option<SourceService>,
    labels: BTreeMap<String, String>,
    metadata_param: Option<MetadataParam>,
    include_unhealthy: bool,
    include_circuit_open: bool,
    enabled_routers: u8,
    service_instances: Option<ServiceInstances>,
    route_rule: Option<Arc<ServiceData>>,
    source_route_rule: Option<Arc<ServiceData>>,
}

impl RouteInfo {
    pub fn new(service_key: ServiceKey, source: Option<SourceService>) -> Self {
        Self {
            service_key,
            source,
            labels: BTreeMap::new(),
            metadata_param: None,
            include_unhealthy: false,
            include_circuit_open: false,
            enabled_routers: router_bit::ALL,
            service_instances: None,
            route_rule: None,
            source_route_rule: None,
        }
    }

    pub fn service_key(&self) -> &ServiceKey {
        &self.service_key
    }

    pub fn source(&self) -> Option<&SourceService> {
        self.source.as_ref()
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    pub fn set_labels(&mut self, labels: BTreeMap<String, String>) {
        self.labels = labels;
    }

    pub fn metadata_param(&self) -> Option<&MetadataParam> {
        self.metadata_param.as_ref()
    }

    pub fn set_metadata_param(&mut self, param: MetadataParam) {
        self.metadata_param = Some(param);
    }

    pub fn include_unhealthy(&self) -> bool {
        self.include_unhealthy
    }

    pub fn set_include_unhealthy(&mut self) {
        self.include_unhealthy = true;
    }

    pub fn include_circuit_open(&self) -> bool {
        self.include_circuit_open
    }

    pub fn set_include_circuit_open(&mut self) {
        self.include_circuit_open = true;
    }

    /// Packed request flags, a cache-key component.
    pub fn request_flags(&self) -> u8 {
        (self.include_unhealthy as u8) | ((self.include_circuit_open as u8) << 1)
    }

    pub fn router_enabled(&self, bit: u8) -> bool {
        self.enabled_routers & bit != 0
    }

    pub fn set_router_enabled(&mut self, bit: u8, enable: bool) {
        if enable {
            self.enabled_routers |= bit;
        } else {
            self.enabled_routers &= !bit;
        }
    }

    pub fn service_instances(&self) -> Option<&ServiceInstances> {
        self.service_instances.as_ref()
    }

    pub fn service_instances_mut(&mut self) -> Option<&mut ServiceInstances> {
        self.service_instances.as_mut()
    }

    pub fn take_service_instances(&mut self) -> Option<ServiceInstances> {
        self.service_instances.take()
    }

    pub fn set_service_instances(&mut self, instances: ServiceInstances) {
        self.service_instances = Some(instances);
    }

    pub fn route_rule(&self) -> Option<&Arc<ServiceData>> {
        self.route_rule.as_ref()
    }

    pub fn set_route_rule(&mut self, data: Arc<ServiceData>) {
        self.route_rule = Some(data);
    }

    pub fn source_route_rule(&self) -> Option<&Arc<ServiceData>> {
        self.source_route_rule.as_ref()
    }

    pub fn set_source_route_rule(&mut self, data: Arc<ServiceData>) {
        self.source_route_rule = Some(data);
    }
}

/// One pending data requirement: a snapshot already good enough, or a
/// notify to wait on.
#[derive(Debug)]
struct DataOrNotify {
    kind_slot: NotifySlot,
    data: Option<Arc<ServiceData>>,
    notify: Arc<ServiceDataNotify>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifySlot {
    TargetInstances,
    TargetRule,
    SourceRule,
}

/// Asynchronous readiness handle for up to three `(service, kind)`
/// subscriptions a route needs before it can run.
#[derive(Debug, Default)]
pub struct RouteInfoNotify {
    entries: Vec<DataOrNotify>,
}

impl RouteInfoNotify {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn push(
        &mut self,
        slot: NotifySlot,
        data: Option<Arc<ServiceData>>,
        notify: Arc<ServiceDataNotify>,
    ) {
        self.entries.push(DataOrNotify {
            kind_slot: slot,
            data,
            notify,
        });
    }

    /// True when every pending kind has a synced snapshot, or a disk-loaded
    /// one when `allow_disk`.
    pub fn is_ready(&self, allow_disk: bool) -> bool {
        self.entries.iter().all(|entry| {
            entry.notify.is_ready(allow_disk)
                || entry
                    .data
                    .as_ref()
                    .is_some_and(|data| data.is_available(allow_disk))
        })
    }

    /// Parks until all notifies resolve or the deadline expires.
    pub fn wait_until(&self, deadline: Instant) -> ApiResult<()> {
        for entry in &self.entries {
            if entry.notify.is_ready(false) {
                continue;
            }
            entry.notify.wait_until(deadline)?;
        }
        Ok(())
    }

    /// Moves the resolved snapshots into `route_info`. Disk-loaded data is
    /// accepted when `allow_disk`; instance data reported absent resolves
    /// the whole route to `ServiceNotFound`.
    pub fn drain_into(self, route_info: &mut RouteInfo, allow_disk: bool) -> ApiResult<()> {
        for entry in self.entries {
            let data = match entry.notify.current() {
                Some(data) if data.is_available(allow_disk) => data,
                _ => match &entry.data {
                    Some(data) if data.is_available(allow_disk) => Arc::clone(data),
                    _ => return Err(ApiError::Timeout),
                },
            };
            match entry.kind_slot {
                NotifySlot::TargetInstances => {
                    if data.status() == DataStatus::NotFound {
                        return Err(ApiError::ServiceNotFound);
                    }
                    debug_assert_eq!(data.kind(), DataKind::Instances);
                    let service = data.service().ok_or(ApiError::InvalidState)?;
                    let instances = ServiceInstances::new(Arc::clone(&data), service)
                        .ok_or(ApiError::InvalidState)?;
                    route_info.set_service_instances(instances);
                }
                NotifySlot::TargetRule => route_info.set_route_rule(data),
                NotifySlot::SourceRule => route_info.set_source_route_rule(data),
            }
        }
        Ok(())
    }
}
