use crate::balance::*;
use crate::conf::LoadBalancerConfig;
use crate::error::ApiError;
use crate::model::*;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

fn spec(id: &str, weight: u32) -> InstanceSpec {
    InstanceSpec {
        id: id.to_string(),
        host: format!("host-{id}"),
        port: 8000,
        weight,
        metadata: BTreeMap::new(),
        region: String::new(),
        zone: String::new(),
        campus: String::new(),
        healthy: true,
        isolated: false,
        priority: 0,
    }
}

fn service_instances(ids_weights: &[(&str, u32)]) -> ServiceInstances {
    let key = ServiceKey::new("Test", "svc.lb");
    let reply = InstancesReply {
        revision: "v1".to_string(),
        service_metadata: BTreeMap::new(),
        instances: ids_weights.iter().map(|(id, w)| spec(id, *w)).collect(),
    };
    let data = ServiceData::from_instances(key.clone(), &reply, DataStatus::Syncing);
    let service = Arc::new(Service::new(key, 1));
    data.attach_service(&service);
    ServiceInstances::new(data, service).unwrap()
}

#[test]
fn test_weighted_random_respects_weights() {
    let instances = service_instances(&[("heavy", 90), ("light", 10)]);
    let balancer = WeightedRandomBalancer::new();
    let mut counts: HashMap<String, u32> = HashMap::new();
    for _ in 0..2_000 {
        let chosen = balancer.choose(&instances, &Criteria::default()).unwrap();
        *counts.entry(chosen.id().to_string()).or_default() += 1;
    }
    let heavy = counts.get("heavy").copied().unwrap_or(0);
    assert!(heavy > 1_500, "heavy got {heavy} of 2000");
    assert!(counts.get("light").copied().unwrap_or(0) > 0);
}

#[test]
fn test_weighted_random_empty_set() {
    let instances = service_instances(&[]);
    let balancer = WeightedRandomBalancer::new();
    assert_eq!(
        balancer.choose(&instances, &Criteria::default()).unwrap_err(),
        ApiError::InstanceNotFound
    );
}

#[test]
fn test_ring_hash_is_deterministic() {
    let instances = service_instances(&[("a", 100), ("b", 100), ("c", 100), ("d", 100)]);
    let balancer = RingHashBalancer::new("ringHash", 100, routing_hasher("murmur3"));
    let criteria = Criteria {
        hash_string: "k".to_string(),
        ..Criteria::default()
    };
    let first = balancer.choose(&instances, &criteria).unwrap();
    for _ in 0..10 {
        let again = balancer.choose(&instances, &criteria).unwrap();
        assert_eq!(first.id(), again.id());
    }
}

#[test]
fn test_ring_hash_replicate_neighbours_are_distinct() {
    let instances = service_instances(&[("a", 100), ("b", 100), ("c", 100), ("d", 100)]);
    let balancer = RingHashBalancer::new("ringHash", 100, routing_hasher("murmur3"));
    let mut seen = HashSet::new();
    for replicate_index in 0..4u32 {
        let criteria = Criteria {
            hash_string: "k".to_string(),
            replicate_index,
            ..Criteria::default()
        };
        let chosen = balancer.choose(&instances, &criteria).unwrap();
        assert!(
            seen.insert(chosen.id().to_string()),
            "replica {replicate_index} repeated {}",
            chosen.id()
        );
    }
    assert_eq!(seen.len(), 4);
}

#[test]
fn test_ring_hash_minimal_churn_on_member_loss() {
    let four = service_instances(&[("a", 100), ("b", 100), ("c", 100), ("d", 100)]);
    let three = service_instances(&[("a", 100), ("b", 100), ("c", 100)]);
    let balancer = RingHashBalancer::new("ringHash", 100, routing_hasher("murmur3"));
    let mut moved = 0;
    let mut stayed = 0;
    for i in 0..200 {
        let criteria = Criteria {
            hash_string: format!("key-{i}"),
            ..Criteria::default()
        };
        let before = balancer.choose(&four, &criteria).unwrap();
        let after = balancer.choose(&three, &criteria).unwrap();
        if before.id() == "d" {
            continue;
        }
        if before.id() == after.id() {
            stayed += 1;
        } else {
            moved += 1;
        }
    }
    assert!(stayed > moved * 5, "stayed={stayed} moved={moved}");
}

#[test]
fn test_maglev_is_deterministic_and_covers() {
    let instances = service_instances(&[("a", 100), ("b", 100), ("c", 100)]);
    let balancer = MaglevBalancer::new(routing_hasher("murmur3"));
    let mut seen = HashSet::new();
    for i in 0..300 {
        let criteria = Criteria {
            hash_string: format!("key-{i}"),
            ..Criteria::default()
        };
        let first = balancer.choose(&instances, &criteria).unwrap();
        let again = balancer.choose(&instances, &criteria).unwrap();
        assert_eq!(first.id(), again.id());
        seen.insert(first.id().to_string());
    }
    assert_eq!(seen.len(), 3);
}

#[test]
fn test_locality_aware_prefers_fast_instances() {
    let instances = service_instances(&[("fast", 100), ("slow", 100)]);
    let balancer = LocalityAwareBalancer::new();
    for _ in 0..20 {
        balancer.feedback("fast", 100);
        balancer.feedback("slow", 100_000);
    }
    let mut counts: HashMap<String, u32> = HashMap::new();
    for _ in 0..1_000 {
        let chosen = balancer.choose(&instances, &Criteria::default()).unwrap();
        *counts.entry(chosen.id().to_string()).or_default() += 1;
    }
    let fast = counts.get("fast").copied().unwrap_or(0);
    assert!(fast > 900, "fast got only {fast} of 1000");
}

#[test]
fn test_half_open_probe_budget_path() {
    let instances = service_instances(&[("a", 100), ("b", 100)]);
    let service = Arc::clone(instances.service());
    let mut half_open = HashMap::new();
    half_open.insert("b".to_string(), 1u32);
    service.set_circuit_breaker(CircuitBreakerUpdate {
        open: HashSet::new(),
        half_open,
        version: 1,
    });
    let probe = try_half_open_probe(&instances).unwrap();
    assert_eq!(probe.id(), "b");
    // Budget exhausted: the next round goes back to normal selection.
    assert!(try_half_open_probe(&instances).is_none());
}

#[test]
fn test_factory_rejects_unknown_kind() {
    let err = create_balancer("definitelyNot", &LoadBalancerConfig::default()).unwrap_err();
    assert_eq!(err, ApiError::PluginError);
}
