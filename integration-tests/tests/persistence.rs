mod common;

use common::*;
use integration_tests::harness::*;
use pretty_assertions::assert_eq;
use std::time::Duration;
use wayfinder::GetOneInstanceRequest;
use wayfinder::model::{Location, ServiceKey};

#[test]
fn test_disk_snapshot_serves_while_control_plane_is_silent() {
    let dir = tempfile::tempdir().unwrap();
    let key = ServiceKey::new("Test", "svc.disk");

    // First client run: fetch and let the background write land on disk.
    {
        let plane = MockControlPlane::new();
        plane.seed_instances(
            &key,
            "rev-disk",
            meta(&[]),
            vec![
                InstanceSpecBuilder::new("i-0", "10.8.0.1", 8000).build(),
                InstanceSpecBuilder::new("i-1", "10.8.0.2", 8000).build(),
            ],
        );
        plane.seed_route_rule(
            &key,
            wayfinder::model::RouteReply {
                revision: "route-disk".to_string(),
                inbounds: vec![],
                outbounds: vec![],
            },
        );
        let client = new_client(&plane, dir.path(), "");
        let request = GetOneInstanceRequest::new("Test", "svc.disk")
            .with_timeout(Duration::from_millis(500));
        client.get_one_instance(&request).unwrap();
        std::thread::sleep(Duration::from_millis(300));
    }

    // Second run: the control plane never answers in time, so the blocking
    // prepare falls back to the persisted snapshot.
    let silent = MockControlPlane::new();
    silent.set_push_delay(Duration::from_secs(30));
    silent.seed_instances(&key, "rev-new", meta(&[]), vec![]);
    let client = new_client(&silent, dir.path(), "");
    let request = GetOneInstanceRequest::new("Test", "svc.disk")
        .with_timeout(Duration::from_millis(300));
    let instance = client.get_one_instance(&request).unwrap();
    assert!(["i-0", "i-1"].contains(&instance.id()));
}

#[test]
fn test_persisted_location_feeds_nearby_routing() {
    let dir = tempfile::tempdir().unwrap();
    write_location(dir.path(), "south", "zone-a");
    let plane = MockControlPlane::new();
    let client = new_client(&plane, dir.path(), "");
    assert_eq!(
        client.context().client_location().get(),
        Location {
            region: "south".to_string(),
            zone: "zone-a".to_string(),
            campus: String::new(),
        }
    );
}

#[test]
fn test_route_rule_query_returns_reply_json() {
    let dir = tempfile::tempdir().unwrap();
    let plane = MockControlPlane::new();
    let key = ServiceKey::new("Test", "svc.rules");
    plane.seed_route_rule(
        &key,
        wayfinder::model::RouteReply {
            revision: "route-7".to_string(),
            inbounds: vec![],
            outbounds: vec![],
        },
    );
    let client = new_client(&plane, dir.path(), "");
    let json = client
        .get_service_route_rule(&key, Duration::from_millis(500))
        .unwrap();
    assert_eq!(json["revision"], "route-7");
}
