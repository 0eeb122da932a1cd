mod error;
mod types;

pub use error::*;
pub use types::*;

use crate::model::ServiceKey;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Root of the hierarchical configuration document.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub consumer: ConsumerConfig,
}

/// Effective per-service view after applying a `consumer.service` override.
#[derive(Debug, Clone)]
pub struct ServiceConfigView {
    pub service_router: ServiceRouterConfig,
    pub load_balancer: LoadBalancerConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub health_check: HealthCheckConfig,
    pub weight_adjuster: WeightAdjusterConfig,
}

impl ClientConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig =
            serde_yaml::from_str(content).map_err(|source| ConfigError::Parse { source })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::read_file(path, source))?;
        Self::from_yaml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.global.server_connector.addresses.is_empty() {
            return Err(ConfigError::EmptyConnectorAddresses);
        }

        let cache = &self.consumer.local_cache;
        if cache.service_expire_time < 60 * 1_000 {
            return Err(ConfigError::invalid(
                "consumer.localCache.serviceExpireTime",
                "must be at least 60s",
            ));
        }
        if cache.service_refresh_interval < 100 {
            return Err(ConfigError::invalid(
                "consumer.localCache.serviceRefreshInterval",
                "must be at least 100ms",
            ));
        }

        validate_router(&self.consumer.service_router)?;
        validate_load_balancer(&self.consumer.load_balancer)?;
        validate_circuit_breaker(&self.consumer.circuit_breaker)?;
        validate_weight_adjuster(&self.consumer.weight_adjuster)?;

        let mut seen = HashSet::new();
        for record in &self.consumer.service {
            if !seen.insert((record.namespace.clone(), record.name.clone())) {
                return Err(ConfigError::DuplicateServiceOverride {
                    namespace: record.namespace.clone(),
                    name: record.name.clone(),
                });
            }
            if let Some(router) = &record.service_router {
                validate_router(router)?;
            }
            if let Some(balancer) = &record.load_balancer {
                validate_load_balancer(balancer)?;
            }
            if let Some(breaker) = &record.circuit_breaker {
                validate_circuit_breaker(breaker)?;
            }
            if let Some(adjuster) = &record.weight_adjuster {
                validate_weight_adjuster(adjuster)?;
            }
        }
        Ok(())
    }

    /// The effective configuration for one service: the global consumer
    /// sections with any per-service override sections swapped in.
    pub fn service_view(&self, key: &ServiceKey) -> ServiceConfigView {
        let record = self
            .consumer
            .service
            .iter()
            .find(|record| record.namespace == key.namespace && record.name == key.name);
        ServiceConfigView {
            service_router: record
                .and_then(|r| r.service_router.clone())
                .unwrap_or_else(|| self.consumer.service_router.clone()),
            load_balancer: record
                .and_then(|r| r.load_balancer.clone())
                .unwrap_or_else(|| self.consumer.load_balancer.clone()),
            circuit_breaker: record
                .and_then(|r| r.circuit_breaker.clone())
                .unwrap_or_else(|| self.consumer.circuit_breaker.clone()),
            health_check: record
                .and_then(|r| r.health_check.clone())
                .unwrap_or_else(|| self.consumer.health_check.clone()),
            weight_adjuster: record
                .and_then(|r| r.weight_adjuster.clone())
                .unwrap_or_else(|| self.consumer.weight_adjuster.clone()),
        }
    }

    /// Refresh interval for a well-known system service, if `key` is one.
    pub fn system_service_interval(&self, key: &ServiceKey) -> Option<u64> {
        let system = &self.global.system;
        [
            &system.discover_cluster,
            &system.heartbeat_cluster,
            &system.monitor_cluster,
            &system.metric_cluster,
        ]
        .into_iter()
        .find(|cluster| cluster.namespace == key.namespace && cluster.service == key.name)
        .map(|cluster| cluster.refresh_interval)
    }
}

fn validate_router(config: &ServiceRouterConfig) -> Result<(), ConfigError> {
    for name in &config.chain {
        if !KNOWN_ROUTERS.contains(&name.as_str()) {
            return Err(ConfigError::UnknownRouter { name: name.clone() });
        }
    }
    let nearby = &config.nearby_based_router;
    if nearby.match_level < nearby.max_match_level {
        return Err(ConfigError::invalid(
            "consumer.serviceRouter.nearbyBasedRouter.matchLevel",
            "must not be coarser than maxMatchLevel",
        ));
    }
    if nearby.unhealthy_percent_to_degrade == 0 || nearby.unhealthy_percent_to_degrade > 100 {
        return Err(ConfigError::invalid(
            "consumer.serviceRouter.nearbyBasedRouter.unhealthyPercentToDegrade",
            "must be in (0, 100]",
        ));
    }
    Ok(())
}

fn validate_load_balancer(config: &LoadBalancerConfig) -> Result<(), ConfigError> {
    if !KNOWN_LOAD_BALANCERS.contains(&config.kind.as_str()) {
        return Err(ConfigError::UnknownLoadBalancer {
            name: config.kind.clone(),
        });
    }
    if config.vnode_count == 0 {
        return Err(ConfigError::invalid(
            "consumer.loadBalancer.vnodeCount",
            "must be positive",
        ));
    }
    Ok(())
}

fn validate_circuit_breaker(config: &CircuitBreakerConfig) -> Result<(), ConfigError> {
    if config.enable && config.check_period < 100 {
        return Err(ConfigError::invalid(
            "consumer.circuitBreaker.checkPeriod",
            "must be at least 100ms",
        ));
    }
    for name in &config.chain {
        if name != BREAKER_ERROR_COUNT && name != BREAKER_ERROR_RATE {
            return Err(ConfigError::UnknownBreaker { name: name.clone() });
        }
    }
    if config.error_count.request_count_after_half_open == 0
        || config.error_rate.request_count_after_half_open == 0
    {
        return Err(ConfigError::invalid(
            "consumer.circuitBreaker.requestCountAfterHalfOpen",
            "must be positive",
        ));
    }
    Ok(())
}

fn validate_weight_adjuster(config: &WeightAdjusterConfig) -> Result<(), ConfigError> {
    if config.aggression <= 0.0 || config.aggression > 1.0 {
        return Err(ConfigError::invalid(
            "consumer.weightAdjuster.aggression",
            "must be in (0, 1]",
        ));
    }
    if config.min_weight_percent <= 0.0 || config.min_weight_percent > 1.0 {
        return Err(ConfigError::invalid(
            "consumer.weightAdjuster.minWeightPercent",
            "must be in (0, 1]",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests;
