use super::*;
use pretty_assertions::assert_eq;

const MINIMAL: &str = r#"
global:
  serverConnector:
    addresses:
      - "127.0.0.1:8091"
"#;

#[test]
fn test_minimal_config_gets_defaults() {
    let config = ClientConfig::from_yaml_str(MINIMAL).unwrap();
    assert_eq!(config.global.api.timeout, 1_000);
    assert_eq!(config.global.log.level, "info");
    assert!(config.global.log.dir.is_empty());
    assert_eq!(
        config.consumer.service_router.chain,
        vec![ROUTER_RULE.to_string(), ROUTER_NEARBY.to_string()]
    );
    assert_eq!(config.consumer.load_balancer.kind, LB_WEIGHTED_RANDOM);
    assert!(config.consumer.circuit_breaker.enable);
    assert_eq!(
        config.consumer.circuit_breaker.chain,
        vec![BREAKER_ERROR_COUNT.to_string(), BREAKER_ERROR_RATE.to_string()]
    );
    assert_eq!(config.consumer.health_check.when, HealthCheckWhen::Never);
}

#[test]
fn test_log_section_parses() {
    let yaml = r#"
global:
  serverConnector:
    addresses: ["127.0.0.1:8091"]
  log:
    dir: "/var/log/wayfinder"
    level: "wayfinder=debug"
"#;
    let config = ClientConfig::from_yaml_str(yaml).unwrap();
    assert_eq!(config.global.log.dir, "/var/log/wayfinder");
    assert_eq!(config.global.log.level, "wayfinder=debug");
}

#[test]
fn test_missing_connector_addresses_rejected() {
    let err = ClientConfig::from_yaml_str("consumer: {}").unwrap_err();
    assert!(matches!(err, ConfigError::EmptyConnectorAddresses));
}

#[test]
fn test_unknown_router_rejected() {
    let yaml = r#"
global:
  serverConnector:
    addresses: ["127.0.0.1:8091"]
consumer:
  serviceRouter:
    chain: ["definitelyNotARouter"]
"#;
    let err = ClientConfig::from_yaml_str(yaml).unwrap_err();
    assert!(matches!(err, ConfigError::UnknownRouter { .. }));
}

#[test]
fn test_match_level_ordering_enforced() {
    let yaml = r#"
global:
  serverConnector:
    addresses: ["127.0.0.1:8091"]
consumer:
  serviceRouter:
    nearbyBasedRouter:
      matchLevel: region
      maxMatchLevel: campus
"#;
    let err = ClientConfig::from_yaml_str(yaml).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { .. }));
}

#[test]
fn test_expire_time_floor_enforced() {
    let yaml = r#"
global:
  serverConnector:
    addresses: ["127.0.0.1:8091"]
consumer:
  localCache:
    serviceExpireTime: 1000
"#;
    let err = ClientConfig::from_yaml_str(yaml).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { .. }));
}

#[test]
fn test_service_override_replaces_section() {
    let yaml = r#"
global:
  serverConnector:
    addresses: ["127.0.0.1:8091"]
consumer:
  loadBalancer:
    type: weightedRandom
  service:
    - namespace: Test
      name: svc.hash
      loadBalancer:
        type: ringHash
        vnodeCount: 64
"#;
    let config = ClientConfig::from_yaml_str(yaml).unwrap();
    let view = config.service_view(&ServiceKey::new("Test", "svc.hash"));
    assert_eq!(view.load_balancer.kind, LB_RING_HASH);
    assert_eq!(view.load_balancer.vnode_count, 64);
    // Untouched sections fall back to the global config.
    assert!(view.circuit_breaker.enable);
    let other = config.service_view(&ServiceKey::new("Test", "svc.other"));
    assert_eq!(other.load_balancer.kind, LB_WEIGHTED_RANDOM);
}

#[test]
fn test_duplicate_override_rejected() {
    let yaml = r#"
global:
  serverConnector:
    addresses: ["127.0.0.1:8091"]
consumer:
  service:
    - namespace: Test
      name: dup
    - namespace: Test
      name: dup
"#;
    let err = ClientConfig::from_yaml_str(yaml).unwrap_err();
    assert!(matches!(err, ConfigError::DuplicateServiceOverride { .. }));
}

#[test]
fn test_system_service_interval_lookup() {
    let yaml = r#"
global:
  serverConnector:
    addresses: ["127.0.0.1:8091"]
  system:
    discoverCluster:
      namespace: System
      service: system.discover
      refreshInterval: 123000
"#;
    let config = ClientConfig::from_yaml_str(yaml).unwrap();
    assert_eq!(
        config.system_service_interval(&ServiceKey::new("System", "system.discover")),
        Some(123_000)
    );
    assert_eq!(
        config.system_service_interval(&ServiceKey::new("Test", "svc.a")),
        None
    );
}
