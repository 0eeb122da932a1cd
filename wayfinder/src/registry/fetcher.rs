use crate::error::ApiResult;
use crate::model::{DataKind, Location, ServiceData, ServiceKey};
use std::sync::Arc;
use std::time::Duration;

/// Callbacks the registry hands to the fetcher when subscribing.
pub trait EventHandler: Send + Sync {
    /// A new snapshot arrived, or `None` when the control plane reports the
    /// service gone (treated identically to an explicit not-found reply).
    fn on_update(&self, key: &ServiceKey, kind: DataKind, data: Option<Arc<ServiceData>>);

    /// The control plane confirmed the current revision is still fresh;
    /// only the persisted sync time needs refreshing.
    fn on_sync(&self, key: &ServiceKey, kind: DataKind);
}

/// Abstract bidirectional link to the control plane. The wire protocol
/// behind it is a collaborator concern; the library only subscribes,
/// receives pushes, and reports the client address.
pub trait DataFetcher: Send + Sync {
    fn register(
        &self,
        key: &ServiceKey,
        kind: DataKind,
        refresh_interval: Duration,
        handler: Arc<dyn EventHandler>,
    );

    fn deregister(&self, key: &ServiceKey, kind: DataKind);

    /// Reports the client address and resolves its location.
    fn report_client(&self, bind_ip: &str, timeout: Duration) -> ApiResult<Location>;
}
