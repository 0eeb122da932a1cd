use crate::conf::ClientConfig;
use crate::context::ClientContext;
use crate::error::ApiError;
use crate::model::*;
use crate::monitor::RecordingSink;
use crate::registry::tests::MockFetcher;
use crate::route::RouteInfo;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

fn config(dir: &std::path::Path) -> ClientConfig {
    let yaml = format!(
        r#"
global:
  serverConnector:
    addresses: ["127.0.0.1:8091"]
consumer:
  localCache:
    persistDir: "{}"
"#,
        dir.display()
    );
    ClientConfig::from_yaml_str(&yaml).unwrap()
}

struct Fixture {
    fetcher: Arc<MockFetcher>,
    context: Arc<ClientContext>,
    _dir: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(MockFetcher::default());
    let context = ClientContext::new(
        config(dir.path()),
        Arc::clone(&fetcher) as _,
        Arc::new(RecordingSink::default()),
    )
    .unwrap();
    Fixture {
        fetcher,
        context,
        _dir: dir,
    }
}

fn instances_data(key: &ServiceKey, revision: &str, ids: &[&str]) -> Arc<ServiceData> {
    let reply = InstancesReply {
        revision: revision.to_string(),
        service_metadata: BTreeMap::new(),
        instances: ids
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
    ServiceData::from_instances(key.clone(), &reply, DataStatus::Syncing)
}

#[test]
fn test_service_context_created_once() {
    let fx = fixture();
    let key = ServiceKey::new("Test", "svc.a");
    let first = fx.context.service_context(&key).unwrap();
    let second = fx.context.service_context(&key).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn test_publish_reaches_service_context_pointer() {
    let fx = fixture();
    let key = ServiceKey::new("Test", "svc.a");
    let service_context = fx.context.service_context(&key).unwrap();
    assert!(service_context.current_instances().is_none());

    let (_, _notify) = fx.context.store().load_or_subscribe(&key, DataKind::Instances);
    fx.fetcher.push(
        &key,
        DataKind::Instances,
        Some(instances_data(&key, "v1", &["i-1"])),
    );
    let current = service_context.current_instances().unwrap();
    assert_eq!(current.revision(), "v1");
}

#[test]
fn test_context_catches_up_with_existing_data() {
    let fx = fixture();
    let key = ServiceKey::new("Test", "svc.b");
    // Data lands before anyone asks for the service context.
    let (_, _notify) = fx.context.store().load_or_subscribe(&key, DataKind::Instances);
    fx.fetcher.push(
        &key,
        DataKind::Instances,
        Some(instances_data(&key, "v2", &["i-1", "i-2"])),
    );
    let service_context = fx.context.service_context(&key).unwrap();
    let current = service_context.current_instances().unwrap();
    assert_eq!(current.revision(), "v2");
}

#[test]
fn test_prepare_uses_context_pointer() {
    let fx = fixture();
    let key = ServiceKey::new("Test", "svc.a");
    let service_context = fx.context.service_context(&key).unwrap();
    let (_, _notify) = fx.context.store().load_or_subscribe(&key, DataKind::Instances);
    fx.fetcher.push(
        &key,
        DataKind::Instances,
        Some(instances_data(&key, "v1", &["i-1", "i-2", "i-3"])),
    );
    fx.fetcher.push(
        &key,
        DataKind::RouteRule,
        Some(ServiceData::not_found(key.clone(), DataKind::RouteRule)),
    );

    let mut route_info = RouteInfo::new(key.clone(), None);
    service_context
        .prepare(&mut route_info, Duration::from_millis(100))
        .unwrap();
    assert_eq!(
        route_info
            .service_instances()
            .unwrap()
            .available()
            .len(),
        3
    );
    service_context.do_route(&mut route_info).unwrap();
}

#[test]
fn test_eviction_removes_service_context() {
    let fx = fixture();
    let key = ServiceKey::new("Test", "svc.a");
    let (_, _notify) = fx.context.store().load_or_subscribe(&key, DataKind::Instances);
    fx.fetcher.push(
        &key,
        DataKind::Instances,
        Some(instances_data(&key, "v1", &["i-1"])),
    );
    let service_context = fx.context.service_context(&key).unwrap();
    assert!(service_context.current_instances().is_some());

    // Control plane reports the service gone.
    fx.fetcher.push(&key, DataKind::Instances, None);
    // A later ask builds a fresh context with no data.
    let rebuilt = fx.context.service_context(&key).unwrap();
    assert!(!Arc::ptr_eq(&service_context, &rebuilt));
}

#[test]
fn test_unknown_balancer_kind_is_plugin_error() {
    let fx = fixture();
    let key = ServiceKey::new("Test", "svc.a");
    let service_context = fx.context.service_context(&key).unwrap();
    assert_eq!(
        service_context.balancer("nope").unwrap_err(),
        ApiError::PluginError
    );
    assert!(service_context.balancer("").is_ok());
    assert!(service_context.balancer("ringHash").is_ok());
}
