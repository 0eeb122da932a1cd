use super::*;
use crate::model::constants;
use crate::route::filters::{RouteFilter, SetDivisionFilter};
use crate::route::{SourceService, router_bit};
use std::sync::Arc;

fn set_instance(id: &str, set_name: &str) -> InstanceSpec {
    InstanceBuilder::new(id)
        .metadata(&[
            (constants::ENABLE_SET_KEY, "Y"),
            (constants::SET_NAME_KEY, set_name),
        ])
        .build()
}

fn fixture() -> (Arc<ServiceData>, Arc<Service>, ServiceKey) {
    let key = ServiceKey::new("Test", "svc.set");
    let specs = vec![
        set_instance("sz-1", "app.sz.1"),
        set_instance("sz-2", "app.sz.2"),
        set_instance("sz-star", "app.sz.*"),
        set_instance("sh-1", "app.sh.1"),
        InstanceBuilder::new("noset-1").build(),
    ];
    let (data, service) = make_service_data(&key, meta(&[]), specs);
    (data, service, key)
}

fn source_with_set(set_name: &str) -> Option<SourceService> {
    Some(SourceService {
        service: None,
        metadata: meta(&[(constants::SET_NAME_KEY, set_name)]),
    })
}

#[test]
fn test_exact_set_match_and_nearby_disabled() {
    let (data, service, key) = fixture();
    let filter = SetDivisionFilter::new();
    let mut info = route_info_with(&key, &data, &service, source_with_set("app.sz.1"));
    assert!(info.router_enabled(router_bit::NEARBY));
    filter.filter(&mut info).unwrap();
    assert_eq!(result_ids(&info), vec!["sz-1"]);
    assert_eq!(
        info.service_instances().unwrap().available().subset()["taf.set"],
        "app.sz.1"
    );
    // Set routing shuts the nearby filter off for the rest of the call.
    assert!(!info.router_enabled(router_bit::NEARBY));
}

#[test]
fn test_group_falls_back_to_wildcard_member() {
    let (data, service, key) = fixture();
    let filter = SetDivisionFilter::new();
    let mut info = route_info_with(&key, &data, &service, source_with_set("app.sz.9"));
    filter.filter(&mut info).unwrap();
    // No app.sz.9 members: fall back to the area's wildcard group.
    assert_eq!(result_ids(&info), vec!["sz-star"]);
}

#[test]
fn test_wildcard_caller_matches_whole_area() {
    let (data, service, key) = fixture();
    let filter = SetDivisionFilter::new();
    let mut info = route_info_with(&key, &data, &service, source_with_set("app.sz.*"));
    filter.filter(&mut info).unwrap();
    let mut ids = result_ids(&info);
    ids.sort();
    assert_eq!(ids, vec!["sz-1", "sz-2", "sz-star"]);
}

#[test]
fn test_without_source_set_passes_through() {
    let (data, service, key) = fixture();
    let filter = SetDivisionFilter::new();
    let mut info = route_info_with(&key, &data, &service, None);
    let before = Arc::clone(info.service_instances().unwrap().available());
    filter.filter(&mut info).unwrap();
    assert!(Arc::ptr_eq(
        &before,
        info.service_instances().unwrap().available()
    ));
    assert!(info.router_enabled(router_bit::NEARBY));
}

#[test]
fn test_mismatched_first_segment_not_enabled() {
    let (data, service, key) = fixture();
    let filter = SetDivisionFilter::new();
    let mut info = route_info_with(&key, &data, &service, source_with_set("other.sz.1"));
    let before = Arc::clone(info.service_instances().unwrap().available());
    filter.filter(&mut info).unwrap();
    assert!(Arc::ptr_eq(
        &before,
        info.service_instances().unwrap().available()
    ));
}

#[test]
fn test_all_matched_down_returns_whole_set() {
    let key = ServiceKey::new("Test", "svc.set");
    let mut down = set_instance("sz-1", "app.sz.1");
    down.healthy = false;
    let specs = vec![down, set_instance("sh-1", "app.sh.1")];
    let (data, service) = make_service_data(&key, meta(&[]), specs);
    let filter = SetDivisionFilter::new();
    let mut info = route_info_with(&key, &data, &service, source_with_set("app.sz.1"));
    filter.filter(&mut info).unwrap();
    assert_eq!(result_ids(&info), vec!["sz-1"]);
    assert_eq!(
        info.service_instances().unwrap().available().subset()["taf.set"],
        "*"
    );
}
