use crate::error::{ApiError, ApiResult};
use crate::model::{DataKind, ServiceData, ServiceKey};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Instant;

/// Parks callers until the first usable snapshot for one `(service, kind)`
/// arrives. Every publish broadcasts; waiters re-check their own readiness
/// predicate so a timed-out waiter can simply retry later.
#[derive(Debug)]
pub struct ServiceDataNotify {
    key: ServiceKey,
    kind: DataKind,
    data: Mutex<Option<Arc<ServiceData>>>,
    cond: Condvar,
}

impl ServiceDataNotify {
    pub fn new(key: ServiceKey, kind: DataKind) -> Self {
        Self {
            key,
            kind,
            data: Mutex::new(None),
            cond: Condvar::new(),
        }
    }

    pub fn service_key(&self) -> &ServiceKey {
        &self.key
    }

    pub fn kind(&self) -> DataKind {
        self.kind
    }

    pub fn publish(&self, data: Arc<ServiceData>) {
        let mut slot = self.data.lock().unwrap();
        *slot = Some(data);
        self.cond.notify_all();
    }

    pub fn current(&self) -> Option<Arc<ServiceData>> {
        self.data.lock().unwrap().clone()
    }

    /// Ready means a server-confirmed snapshot (or explicit not-found), or a
    /// disk-loaded one when the caller tolerates it.
    pub fn is_ready(&self, allow_disk: bool) -> bool {
        self.data
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|data| data.is_available(allow_disk))
    }

    /// Blocks until a server-confirmed snapshot arrives or the deadline
    /// expires. Always returns by the deadline.
    pub fn wait_until(&self, deadline: Instant) -> ApiResult<Arc<ServiceData>> {
        let mut slot = self.data.lock().unwrap();
        loop {
            if let Some(data) = slot.as_ref()
                && data.is_available(false)
            {
                return Ok(Arc::clone(data));
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ApiError::Timeout);
            }
            let (next, _) = self.cond.wait_timeout(slot, deadline - now).unwrap();
            slot = next;
        }
    }
}
