use crate::model::Instance;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Result payload of the batch and response-form APIs. The first instance
/// is the primary pick; any further ones are backups (possibly fewer than
/// requested).
#[derive(Debug, Clone)]
pub struct InstancesResponse {
    pub flow_id: u64,
    pub service_namespace: String,
    pub service_name: String,
    pub revision: String,
    pub service_metadata: BTreeMap<String, String>,
    /// Subset labels recorded by the filter that produced the final set.
    pub subset: BTreeMap<String, String>,
    pub instances: Vec<Arc<Instance>>,
}

impl InstancesResponse {
    pub fn primary(&self) -> Option<&Arc<Instance>> {
        self.instances.first()
    }
}
