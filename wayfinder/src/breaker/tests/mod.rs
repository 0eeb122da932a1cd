use crate::breaker::*;
use crate::cache::{PersistConfig, PersistStore};
use crate::conf::{CircuitBreakerConfig, ErrorCountConfig, HealthCheckWhen};
use crate::model::*;
use crate::monitor::RecordingSink;
use crate::registry::tests::MockFetcher;
use crate::registry::{ServiceStore, StoreConfig};
use crate::sched::Executor;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

fn gauge(key: &ServiceKey, instance_id: &str, ok: bool) -> InstanceGauge {
    InstanceGauge {
        service_key: key.clone(),
        instance_id: instance_id.to_string(),
        latency: Duration::from_millis(5),
        ret_status: if ok { CallRetStatus::Ok } else { CallRetStatus::Error },
        ret_code: if ok { 0 } else { -1 },
        locality_tag: 0,
    }
}

struct Fixture {
    key: ServiceKey,
    store: Arc<ServiceStore>,
    monitor: Arc<RecordingSink>,
    _dir: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let key = ServiceKey::new("Test", "svc.breaker");
    let fetcher = Arc::new(MockFetcher::default());
    let monitor = Arc::new(RecordingSink::default());
    let store = ServiceStore::new(
        StoreConfig {
            service_expire_time: Duration::from_secs(60),
            service_refresh_interval: Duration::from_millis(500),
            system_intervals: Vec::new(),
        },
        fetcher as _,
        Arc::new(PersistStore::new(PersistConfig {
            dir: dir.path().to_path_buf(),
            ..PersistConfig::default()
        })),
        Executor::new("cache_mgr"),
        Arc::clone(&monitor) as _,
    );

    // Publish three instances so the service aggregate exists.
    let reply = InstancesReply {
        revision: "v1".to_string(),
        service_metadata: BTreeMap::new(),
        instances: ["i-0", "i-1", "i-2"]
            .iter()
            .enumerate()
            .map(|(index, id)| InstanceSpec {
                id: id.to_string(),
                host: format!("10.0.0.{}", index + 1),
                port: 8000,
                weight: 100,
                metadata: BTreeMap::new(),
                region: String::new(),
                zone: String::new(),
                campus: String::new(),
                healthy: true,
                isolated: false,
                priority: 0,
            })
            .collect(),
    };
    store.publish(
        &key,
        DataKind::Instances,
        Some(ServiceData::from_instances(
            key.clone(),
            &reply,
            DataStatus::Syncing,
        )),
    );

    Fixture {
        key,
        store,
        monitor,
        _dir: dir,
    }
}

fn breaker_config(threshold: u32, sleep_window_ms: u64) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        check_period: 100,
        chain: vec!["errorCount".to_string()],
        error_count: ErrorCountConfig {
            continuous_error_threshold: threshold,
            sleep_window: sleep_window_ms,
            request_count_after_half_open: 1,
            ..ErrorCountConfig::default()
        },
        ..CircuitBreakerConfig::default()
    }
}

fn make_chain(fx: &Fixture, config: &CircuitBreakerConfig) -> CircuitBreakerChain {
    CircuitBreakerChain::new(
        fx.key.clone(),
        config,
        HealthCheckWhen::Never,
        Arc::clone(&fx.store),
        Arc::clone(&fx.monitor) as _,
    )
    .unwrap()
}

#[test]
fn test_error_count_trips_open_and_publishes() {
    let fx = fixture();
    let chain = make_chain(&fx, &breaker_config(5, 10_000));

    for _ in 0..4 {
        assert!(chain.real_time_break(&gauge(&fx.key, "i-0", false)).is_none());
    }
    let version = chain.real_time_break(&gauge(&fx.key, "i-0", false));
    assert!(version.is_some());

    let service = fx.store.service(&fx.key).unwrap();
    assert!(service.open_instances().contains("i-0"));
    assert!(service.circuit_breaker_version() >= chain.chain_data().current_version());

    // Exactly one circuit-change record for the transition.
    let changes = fx.monitor.circuit_changes.lock().unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].2.from, CircuitStatus::Closed);
    assert_eq!(changes[0].2.to, CircuitStatus::Open);
}

#[test]
fn test_success_resets_consecutive_count() {
    let fx = fixture();
    let chain = make_chain(&fx, &breaker_config(3, 10_000));
    chain.real_time_break(&gauge(&fx.key, "i-0", false));
    chain.real_time_break(&gauge(&fx.key, "i-0", false));
    chain.real_time_break(&gauge(&fx.key, "i-0", true));
    chain.real_time_break(&gauge(&fx.key, "i-0", false));
    chain.real_time_break(&gauge(&fx.key, "i-0", false));
    assert_eq!(chain.chain_data().status_of("i-0"), CircuitStatus::Closed);
}

#[test]
fn test_open_to_half_open_to_closed_cycle() {
    let fx = fixture();
    let chain = make_chain(&fx, &breaker_config(2, 50));
    chain.real_time_break(&gauge(&fx.key, "i-0", false));
    chain.real_time_break(&gauge(&fx.key, "i-0", false));
    assert_eq!(chain.chain_data().status_of("i-0"), CircuitStatus::Open);

    // Before the sleep window elapses, timing does nothing.
    let exists = |_: &str| true;
    chain.timing_break(&exists);
    assert_eq!(chain.chain_data().status_of("i-0"), CircuitStatus::Open);

    std::thread::sleep(Duration::from_millis(160));
    chain.timing_break(&exists);
    assert_eq!(chain.chain_data().status_of("i-0"), CircuitStatus::HalfOpen);

    let service = fx.store.service(&fx.key).unwrap();
    assert!(service.half_open_instances().contains("i-0"));
    assert!(!service.open_instances().contains("i-0"));

    // One successful probe closes it (budget 1).
    chain.real_time_break(&gauge(&fx.key, "i-0", true));
    assert_eq!(chain.chain_data().status_of("i-0"), CircuitStatus::Closed);
    let service = fx.store.service(&fx.key).unwrap();
    assert!(service.open_instances().is_empty());
    assert!(service.half_open_instances().is_empty());
}

#[test]
fn test_failed_probe_reopens() {
    let fx = fixture();
    let chain = make_chain(&fx, &breaker_config(2, 50));
    chain.real_time_break(&gauge(&fx.key, "i-0", false));
    chain.real_time_break(&gauge(&fx.key, "i-0", false));
    std::thread::sleep(Duration::from_millis(160));
    chain.timing_break(&|_| true);
    assert_eq!(chain.chain_data().status_of("i-0"), CircuitStatus::HalfOpen);

    chain.real_time_break(&gauge(&fx.key, "i-0", false));
    assert_eq!(chain.chain_data().status_of("i-0"), CircuitStatus::Open);
}

#[test]
fn test_version_strictly_increases_per_transition() {
    let fx = fixture();
    let chain = make_chain(&fx, &breaker_config(1, 50));
    let before = chain.chain_data().current_version();
    chain.real_time_break(&gauge(&fx.key, "i-0", false));
    let after_open = chain.chain_data().current_version();
    assert!(after_open > before);
    std::thread::sleep(Duration::from_millis(160));
    chain.timing_break(&|_| true);
    assert!(chain.chain_data().current_version() > after_open);
}

#[test]
fn test_owner_arbitration_rejects_other_plugins() {
    let fx = fixture();
    let config = CircuitBreakerConfig {
        check_period: 100,
        chain: vec!["errorCount".to_string(), "errorRate".to_string()],
        error_count: ErrorCountConfig {
            continuous_error_threshold: 2,
            sleep_window: 60_000,
            request_count_after_half_open: 1,
            ..ErrorCountConfig::default()
        },
        ..CircuitBreakerConfig::default()
    };
    let chain = make_chain(&fx, &config);
    // errorCount opens i-0 first and becomes the owner.
    chain.real_time_break(&gauge(&fx.key, "i-0", false));
    chain.real_time_break(&gauge(&fx.key, "i-0", false));
    assert_eq!(chain.chain_data().status_of("i-0"), CircuitStatus::Open);

    // A foreign plugin slot may not drive the recovery.
    assert!(
        chain
            .chain_data()
            .translate_status(2, "i-0", CircuitStatus::Open, CircuitStatus::HalfOpen)
            .is_none()
    );
    // The owner may.
    assert!(
        chain
            .chain_data()
            .translate_status(1, "i-0", CircuitStatus::Open, CircuitStatus::HalfOpen)
            .is_some()
    );
}

#[test]
fn test_health_checker_denied_without_always_slot() {
    let fx = fixture();
    let chain = make_chain(&fx, &breaker_config(5, 10_000));
    assert!(!chain.translate_status("i-0", CircuitStatus::Closed, CircuitStatus::Open));
}

#[test]
fn test_health_checker_opens_through_extra_slot() {
    let fx = fixture();
    let chain = CircuitBreakerChain::new(
        fx.key.clone(),
        &breaker_config(5, 10_000),
        HealthCheckWhen::Always,
        Arc::clone(&fx.store),
        Arc::clone(&fx.monitor) as _,
    )
    .unwrap();
    assert!(chain.translate_status("i-0", CircuitStatus::Closed, CircuitStatus::Open));
    assert_eq!(chain.chain_data().status_of("i-0"), CircuitStatus::Open);
    chain.sync_now();
    let service = fx.store.service(&fx.key).unwrap();
    assert!(service.open_instances().contains("i-0"));
}

#[test]
fn test_error_rate_opens_on_ratio() {
    let fx = fixture();
    let config = CircuitBreakerConfig {
        check_period: 100,
        chain: vec!["errorRate".to_string()],
        ..CircuitBreakerConfig::default()
    };
    let chain = make_chain(&fx, &config);
    // Default: volume threshold 10, rate 0.5.
    for i in 0..10 {
        chain.real_time_break(&gauge(&fx.key, "i-1", i % 2 == 0 && i < 2));
    }
    assert_eq!(chain.chain_data().status_of("i-1"), CircuitStatus::Open);
}

#[test]
fn test_clean_stats_drops_gone_instances() {
    let fx = fixture();
    let chain = make_chain(&fx, &breaker_config(5, 10_000));
    chain.real_time_break(&gauge(&fx.key, "gone-1", false));
    std::thread::sleep(Duration::from_millis(120));
    // Instance no longer exists: stats purged, no transition ever happens.
    chain.timing_break(&|id| id != "gone-1");
    for _ in 0..10 {
        chain.real_time_break(&gauge(&fx.key, "i-0", true));
    }
    assert_eq!(chain.chain_data().status_of("gone-1"), CircuitStatus::Closed);
}
