use super::SlowStartAdjuster;
use crate::conf::WeightAdjusterConfig;
use crate::model::*;
use std::collections::BTreeMap;
use std::sync::Arc;

fn data(ids: &[&str]) -> Arc<ServiceData> {
    let reply = InstancesReply {
        revision: "v1".to_string(),
        service_metadata: BTreeMap::new(),
        instances: ids
            .iter()
            .map(|id| InstanceSpec {
                id: id.to_string(),
                host: format!("host-{id}"),
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
    ServiceData::from_instances(ServiceKey::new("Test", "svc.ss"), &reply, DataStatus::Syncing)
}

fn adjuster() -> SlowStartAdjuster {
    SlowStartAdjuster::new(WeightAdjusterConfig {
        enable: true,
        window: 60_000,
        step_size: 10_000,
        aggression: 1.0,
        min_weight_percent: 0.1,
    })
}

#[test]
fn test_new_instance_starts_at_min_percent() {
    let adjuster = adjuster();
    let old = data(&["a"]);
    let new = data(&["a", "b"]);
    assert!(adjuster.on_instances_update(&new, Some(&old)));
    let b = new.instances().unwrap().by_id("b").unwrap();
    assert_eq!(b.dynamic_weight(), 10);
    // The instance that was already there is untouched.
    let a = new.instances().unwrap().by_id("a").unwrap();
    assert_eq!(a.dynamic_weight(), 100);
}

#[test]
fn test_first_snapshot_is_not_ramped() {
    let adjuster = adjuster();
    let new = data(&["a", "b"]);
    assert!(!adjuster.on_instances_update(&new, None));
    assert_eq!(new.instances().unwrap().by_id("b").unwrap().dynamic_weight(), 100);
}

#[test]
fn test_adjust_ramps_and_finishes() {
    let adjuster = SlowStartAdjuster::new(WeightAdjusterConfig {
        enable: true,
        window: 10_000,
        step_size: 1_000,
        aggression: 1.0,
        min_weight_percent: 0.1,
    });
    let old = data(&["a"]);
    let new = data(&["a", "b"]);
    adjuster.on_instances_update(&new, Some(&old));

    // Mid-window: weight sits between the seed and the static value.
    assert!(adjuster.adjust(&new));
    let b = new.instances().unwrap().by_id("b").unwrap();
    assert!(b.dynamic_weight() >= 10);
    assert!(b.dynamic_weight() <= 100);
}

#[test]
fn test_vanished_instance_leaves_ramp_set() {
    let adjuster = adjuster();
    let old = data(&["a"]);
    let new = data(&["a", "b"]);
    adjuster.on_instances_update(&new, Some(&old));
    // A later snapshot without "b": the ramp entry is dropped.
    let without_b = data(&["a"]);
    assert!(!adjuster.adjust(&without_b));
}

#[test]
fn test_aggression_curve_is_steeper() {
    let half_linear = SlowStartAdjuster::aggression_factor(0.25, 1.0);
    let half_aggressive = SlowStartAdjuster::aggression_factor(0.25, 0.5);
    assert_eq!(half_linear, 0.25);
    // aggression < 1 ramps slower early in the window.
    assert!(half_aggressive < half_linear);
}

#[test]
fn test_disabled_adjuster_is_inert() {
    let adjuster = SlowStartAdjuster::new(WeightAdjusterConfig {
        enable: false,
        ..WeightAdjusterConfig::default()
    });
    let old = data(&["a"]);
    let new = data(&["a", "b"]);
    assert!(!adjuster.on_instances_update(&new, Some(&old)));
    assert_eq!(new.instances().unwrap().by_id("b").unwrap().dynamic_weight(), 100);
}
