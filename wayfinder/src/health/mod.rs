mod tcp;

pub use tcp::*;

use crate::breaker::CircuitBreakerChain;
use crate::conf::{HealthCheckConfig, HealthCheckWhen};
use crate::error::{ApiError, ApiResult};
use crate::model::{CircuitStatus, DataKind, Instance, ServiceKey};
use crate::registry::ServiceStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// A health-check probe. Concrete probes are collaborator plugins; the
/// crate ships the chain plus a TCP-connect default.
pub trait HealthChecker: Send + Sync {
    fn name(&self) -> &'static str;

    fn detect(&self, instance: &Instance, timeout: Duration) -> bool;
}

fn create_checker(name: &str) -> ApiResult<Arc<dyn HealthChecker>> {
    match name {
        "tcp" => Ok(Arc::new(TcpChecker)),
        other => {
            error!(checker = other, "unknown health checker plugin");
            Err(ApiError::PluginError)
        }
    }
}

/// Drives probe rounds against a service's instances and pushes the
/// outcomes through the breaker chain's transition rules.
pub struct HealthCheckerChain {
    service_key: ServiceKey,
    when: HealthCheckWhen,
    timeout: Duration,
    interval: Duration,
    checkers: Vec<Arc<dyn HealthChecker>>,
    store: Arc<ServiceStore>,
}

impl HealthCheckerChain {
    pub fn new(
        service_key: ServiceKey,
        config: &HealthCheckConfig,
        store: Arc<ServiceStore>,
    ) -> ApiResult<Self> {
        let checkers = if config.when == HealthCheckWhen::Never {
            Vec::new()
        } else {
            config
                .chain
                .iter()
                .map(|name| create_checker(name))
                .collect::<ApiResult<Vec<_>>>()?
        };
        Ok(Self {
            service_key,
            when: config.when,
            timeout: Duration::from_millis(config.timeout),
            interval: Duration::from_millis(config.interval),
            checkers,
            store,
        })
    }

    pub fn when(&self) -> HealthCheckWhen {
        self.when
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn probe(&self, instance: &Instance) -> bool {
        self.checkers
            .iter()
            .all(|checker| checker.detect(instance, self.timeout))
    }

    /// One probe round. `on_recover` probes only circuit-open instances to
    /// accelerate their recovery; `always` additionally opens instances
    /// that stop answering.
    pub fn run_round(&self, breaker_chain: &CircuitBreakerChain) {
        match self.when {
            HealthCheckWhen::Never => {}
            HealthCheckWhen::OnRecover => self.probe_open_instances(breaker_chain),
            HealthCheckWhen::Always => {
                self.probe_open_instances(breaker_chain);
                self.probe_closed_instances(breaker_chain);
            }
        }
    }

    fn probe_open_instances(&self, breaker_chain: &CircuitBreakerChain) {
        let Ok((_data, open)) = self.store.open_instances(&self.service_key) else {
            return;
        };
        for instance in open {
            if self.probe(&instance) {
                debug!(
                    service = %self.service_key,
                    instance = instance.id(),
                    "health probe succeeded, promoting to half-open"
                );
                breaker_chain.translate_status(
                    instance.id(),
                    CircuitStatus::Open,
                    CircuitStatus::HalfOpen,
                );
            }
        }
        breaker_chain.sync_now();
    }

    fn probe_closed_instances(&self, breaker_chain: &CircuitBreakerChain) {
        let Some(data) = self
            .store
            .peek_service_data(&self.service_key, DataKind::Instances)
        else {
            return;
        };
        let Some(instances) = data.instances() else {
            return;
        };
        for instance in instances.instances() {
            if breaker_chain.chain_data().status_of(instance.id()) != CircuitStatus::Closed {
                continue;
            }
            if !self.probe(instance) {
                debug!(
                    service = %self.service_key,
                    instance = instance.id(),
                    "health probe failed, opening instance"
                );
                breaker_chain.translate_status(
                    instance.id(),
                    CircuitStatus::Closed,
                    CircuitStatus::Open,
                );
            }
        }
        breaker_chain.sync_now();
    }
}
