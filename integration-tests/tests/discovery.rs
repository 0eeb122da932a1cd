mod common;

use common::*;
use integration_tests::harness::*;
use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use wayfinder::error::ApiError;
use wayfinder::{GetInstancesRequest, GetOneInstanceRequest, ServiceKey};

fn seed_three(plane: &std::sync::Arc<MockControlPlane>, key: &ServiceKey) {
    plane.seed_instances(
        key,
        "rev-1",
        meta(&[]),
        vec![
            InstanceSpecBuilder::new("i-0", "10.1.0.1", 8000).build(),
            InstanceSpecBuilder::new("i-1", "10.1.0.2", 8000).build(),
            InstanceSpecBuilder::new("i-2", "10.1.0.3", 8000).build(),
        ],
    );
}

#[test]
fn test_fresh_start_empty_cache() {
    let dir = tempfile::tempdir().unwrap();
    let plane = MockControlPlane::new();
    plane.set_push_delay(Duration::from_millis(50));
    let key = ServiceKey::new("Test", "svc.a");
    seed_three(&plane, &key);
    let client = new_client(&plane, dir.path(), "");

    let request = GetOneInstanceRequest::new("Test", "svc.a")
        .with_timeout(Duration::from_millis(500));
    let instance = client.get_one_instance(&request).unwrap();
    assert!(["i-0", "i-1", "i-2"].contains(&instance.id()));

    let all = client
        .get_all_instances(&GetInstancesRequest::new("Test", "svc.a"))
        .unwrap();
    assert_eq!(all.instances.len(), 3);
    assert_eq!(all.revision, "rev-1");
}

#[test]
fn test_zero_timeout_returns_timeout_when_not_cached() {
    let dir = tempfile::tempdir().unwrap();
    let plane = MockControlPlane::new();
    plane.set_push_delay(Duration::from_millis(300));
    let key = ServiceKey::new("Test", "svc.slow");
    seed_three(&plane, &key);
    let client = new_client(&plane, dir.path(), "");

    let request =
        GetOneInstanceRequest::new("Test", "svc.slow").with_timeout(Duration::ZERO);
    assert_eq!(client.get_one_instance(&request).unwrap_err(), ApiError::Timeout);

    // Once the push lands, the same request succeeds.
    std::thread::sleep(Duration::from_millis(400));
    assert!(client.get_one_instance(&request).is_ok());
}

#[test]
fn test_timeout_is_bounded_by_wall_clock() {
    let dir = tempfile::tempdir().unwrap();
    let plane = MockControlPlane::new();
    plane.set_push_delay(Duration::from_secs(5));
    let key = ServiceKey::new("Test", "svc.never");
    seed_three(&plane, &key);
    let client = new_client(&plane, dir.path(), "");

    let request = GetOneInstanceRequest::new("Test", "svc.never")
        .with_timeout(Duration::from_millis(200));
    let start = Instant::now();
    assert_eq!(client.get_one_instance(&request).unwrap_err(), ApiError::Timeout);
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_millis(600), "took {elapsed:?}");
}

#[test]
fn test_unknown_service_is_service_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let plane = MockControlPlane::new();
    let client = new_client(&plane, dir.path(), "");

    let request = GetOneInstanceRequest::new("Test", "svc.ghost")
        .with_timeout(Duration::from_millis(300));
    assert_eq!(
        client.get_one_instance(&request).unwrap_err(),
        ApiError::ServiceNotFound
    );
}

#[test]
fn test_empty_request_is_invalid_argument() {
    let dir = tempfile::tempdir().unwrap();
    let plane = MockControlPlane::new();
    let client = new_client(&plane, dir.path(), "");
    assert_eq!(
        client
            .get_one_instance(&GetOneInstanceRequest::new("", "svc"))
            .unwrap_err(),
        ApiError::InvalidArgument
    );
    assert_eq!(
        client
            .get_one_instance(&GetOneInstanceRequest::new("Test", ""))
            .unwrap_err(),
        ApiError::InvalidArgument
    );
}

#[test]
fn test_async_future_resolves() {
    let dir = tempfile::tempdir().unwrap();
    let plane = MockControlPlane::new();
    plane.set_push_delay(Duration::from_millis(80));
    let key = ServiceKey::new("Test", "svc.async");
    seed_three(&plane, &key);
    let client = new_client(&plane, dir.path(), "");

    let request = GetOneInstanceRequest::new("Test", "svc.async");
    let future = client.async_get_one_instance(&request).unwrap();
    assert!(!future.is_done(false));

    let response = future.get(Duration::from_millis(500)).unwrap();
    assert!(future.is_done(false));
    assert!(["i-0", "i-1", "i-2"].contains(&response.primary().unwrap().id()));
}

#[test]
fn test_backup_selection_for_ring_hash() {
    let dir = tempfile::tempdir().unwrap();
    let plane = MockControlPlane::new();
    let key = ServiceKey::new("Test", "svc.ring");
    plane.seed_instances(
        &key,
        "rev-1",
        meta(&[]),
        vec![
            InstanceSpecBuilder::new("i-0", "10.1.0.1", 8000).build(),
            InstanceSpecBuilder::new("i-1", "10.1.0.2", 8000).build(),
            InstanceSpecBuilder::new("i-2", "10.1.0.3", 8000).build(),
            InstanceSpecBuilder::new("i-3", "10.1.0.4", 8000).build(),
        ],
    );
    let extra = r#"
  loadBalancer:
    type: ringHash
"#;
    let client = new_client(&plane, dir.path(), extra);

    let request = GetOneInstanceRequest::new("Test", "svc.ring")
        .with_hash_string("k")
        .with_backup_instance_num(2)
        .with_timeout(Duration::from_millis(500));
    let response = client.get_one_instance_response(&request).unwrap();
    assert_eq!(response.instances.len(), 3);

    // The first entry is the ring's primary for "k".
    let primary = client.get_one_instance(&request).unwrap();
    assert_eq!(response.instances[0].id(), primary.id());

    // All three are distinct ring members.
    let distinct: HashSet<&str> = response.instances.iter().map(|i| i.id()).collect();
    assert_eq!(distinct.len(), 3);
}

#[test]
fn test_get_instances_include_flags() {
    let dir = tempfile::tempdir().unwrap();
    let plane = MockControlPlane::new();
    let key = ServiceKey::new("Test", "svc.flags");
    plane.seed_instances(
        &key,
        "rev-1",
        meta(&[]),
        vec![
            InstanceSpecBuilder::new("up-0", "10.1.0.1", 8000).build(),
            InstanceSpecBuilder::new("up-1", "10.1.0.2", 8000).build(),
            InstanceSpecBuilder::new("down-0", "10.1.0.3", 8000).unhealthy().build(),
        ],
    );
    let client = new_client(&plane, dir.path(), "");

    let base = GetInstancesRequest::new("Test", "svc.flags")
        .with_timeout(Duration::from_millis(500));
    let filtered = client.get_instances(&base).unwrap();
    assert_eq!(filtered.instances.len(), 2);

    let with_unhealthy = client
        .get_instances(&base.clone().include_unhealthy_instances())
        .unwrap();
    assert_eq!(with_unhealthy.instances.len(), 3);

    let skipped = client
        .get_instances(&base.clone().skip_route_filter())
        .unwrap();
    // Skipping the pipeline returns the raw selectable set.
    assert_eq!(skipped.instances.len(), 3);
}
