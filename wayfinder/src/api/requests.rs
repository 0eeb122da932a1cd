use crate::balance::Criteria;
use crate::breaker::CallRetStatus;
use crate::model::ServiceKey;
use crate::route::{MetadataFailover, MetadataParam, SourceService};
use std::collections::BTreeMap;
use std::time::Duration;

/// Request for the one-instance selection APIs.
#[derive(Debug, Clone)]
pub struct GetOneInstanceRequest {
    pub(crate) service_key: ServiceKey,
    pub(crate) source: Option<SourceService>,
    pub(crate) labels: BTreeMap<String, String>,
    pub(crate) metadata: Option<MetadataParam>,
    pub(crate) criteria: Criteria,
    pub(crate) lb_kind: String,
    pub(crate) timeout: Option<Duration>,
    pub(crate) backup_instance_num: u32,
    pub(crate) flow_id: Option<u64>,
}

impl GetOneInstanceRequest {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            service_key: ServiceKey::new(namespace, name),
            source: None,
            labels: BTreeMap::new(),
            metadata: None,
            criteria: Criteria::default(),
            lb_kind: String::new(),
            timeout: None,
            backup_instance_num: 0,
            flow_id: None,
        }
    }

    pub fn service_key(&self) -> &ServiceKey {
        &self.service_key
    }

    pub fn with_source(mut self, source: SourceService) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_source_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.source = Some(SourceService {
            service: None,
            metadata,
        });
        self
    }

    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = Some(MetadataParam {
            metadata,
            failover: MetadataFailover::None,
        });
        self
    }

    pub fn with_metadata_failover(mut self, failover: MetadataFailover) -> Self {
        let param = self.metadata.get_or_insert_with(MetadataParam::default);
        param.failover = failover;
        self
    }

    pub fn with_hash_string(mut self, hash_string: impl Into<String>) -> Self {
        self.criteria.hash_string = hash_string.into();
        self
    }

    pub fn with_hash_key(mut self, hash_key: u64) -> Self {
        self.criteria.hash_key = hash_key;
        self
    }

    pub fn with_replicate_index(mut self, replicate_index: u32) -> Self {
        self.criteria.replicate_index = replicate_index;
        self
    }

    pub fn with_load_balancer(mut self, kind: impl Into<String>) -> Self {
        self.lb_kind = kind.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_backup_instance_num(mut self, count: u32) -> Self {
        self.backup_instance_num = count;
        self
    }

    pub fn with_flow_id(mut self, flow_id: u64) -> Self {
        self.flow_id = Some(flow_id);
        self
    }
}

/// Request for the batch instance APIs.
#[derive(Debug, Clone)]
pub struct GetInstancesRequest {
    pub(crate) service_key: ServiceKey,
    pub(crate) source: Option<SourceService>,
    pub(crate) metadata: Option<MetadataParam>,
    pub(crate) include_unhealthy: bool,
    pub(crate) include_circuit_open: bool,
    pub(crate) skip_route_filter: bool,
    pub(crate) timeout: Option<Duration>,
    pub(crate) flow_id: Option<u64>,
}

impl GetInstancesRequest {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            service_key: ServiceKey::new(namespace, name),
            source: None,
            metadata: None,
            include_unhealthy: false,
            include_circuit_open: false,
            skip_route_filter: false,
            timeout: None,
            flow_id: None,
        }
    }

    pub fn service_key(&self) -> &ServiceKey {
        &self.service_key
    }

    pub fn with_source(mut self, source: SourceService) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = Some(MetadataParam {
            metadata,
            failover: MetadataFailover::None,
        });
        self
    }

    pub fn include_unhealthy_instances(mut self) -> Self {
        self.include_unhealthy = true;
        self
    }

    pub fn include_circuit_breaker_instances(mut self) -> Self {
        self.include_circuit_open = true;
        self
    }

    pub fn skip_route_filter(mut self) -> Self {
        self.skip_route_filter = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_flow_id(mut self, flow_id: u64) -> Self {
        self.flow_id = Some(flow_id);
        self
    }
}

/// One finished call against an instance, reported back so the breaker,
/// stat and balancer feedback paths see it.
#[derive(Debug, Clone)]
pub struct ServiceCallResult {
    pub(crate) service_key: ServiceKey,
    pub(crate) instance_id: Option<String>,
    pub(crate) host_port: Option<(String, u16)>,
    pub(crate) latency: Duration,
    pub(crate) ret_status: CallRetStatus,
    pub(crate) ret_code: i32,
    pub(crate) locality_tag: u64,
}

impl ServiceCallResult {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            service_key: ServiceKey::new(namespace, name),
            instance_id: None,
            host_port: None,
            latency: Duration::ZERO,
            ret_status: CallRetStatus::Ok,
            ret_code: 0,
            locality_tag: 0,
        }
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    pub fn with_host_port(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host_port = Some((host.into(), port));
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_ret_status(mut self, status: CallRetStatus) -> Self {
        self.ret_status = status;
        self
    }

    pub fn with_ret_code(mut self, code: i32) -> Self {
        self.ret_code = code;
        self
    }

    pub fn with_locality_tag(mut self, tag: u64) -> Self {
        self.locality_tag = tag;
        self
    }
}
