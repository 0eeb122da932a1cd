use crate::conf::{MatchLevel, NearbyRouterConfig};
use crate::error::{ApiError, ApiResult};
use crate::model::{ClientLocation, Instance, InstancesSet, Location};
use crate::monitor::MonitorSink;
use crate::route::filters::{RouteFilter, report_recover_edge};
use crate::route::{
    ClearableCache, FilterCache, RouteInfo, SubsetCacheValue, router_bit, unfit_instance_ids,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct NearbyCacheKey {
    prior: usize,
    location_version: u64,
    circuit_version: u64,
    flags: u8,
}

#[derive(Default)]
struct LevelBucket {
    healthy: Vec<Arc<Instance>>,
    unhealthy: Vec<Arc<Instance>>,
}

/// Promotes instances at the closest configured locality level, degrading
/// one level at a time toward `maxMatchLevel` when too many candidates are
/// unhealthy; the final fallback hands back unhealthy instances flagged
/// recover-all.
pub struct NearbyFilter {
    config: NearbyRouterConfig,
    client_location: Arc<ClientLocation>,
    monitor: Arc<dyn MonitorSink>,
    cache: Arc<FilterCache<NearbyCacheKey, SubsetCacheValue>>,
}

fn level_key(level: usize) -> &'static str {
    match level {
        1 => "region",
        2 => "zone",
        3 => "campus",
        _ => "none",
    }
}

fn level_value(location: &Location, level: usize) -> String {
    match level {
        1 => location.region.clone(),
        2 => location.zone.clone(),
        3 => location.campus.clone(),
        _ => String::new(),
    }
}

impl NearbyFilter {
    pub fn new(
        config: NearbyRouterConfig,
        client_location: Arc<ClientLocation>,
        monitor: Arc<dyn MonitorSink>,
    ) -> ApiResult<Self> {
        if config.strict_nearby && !Self::location_covers(&config, &client_location.get()) {
            tracing::error!("strict nearby requires a server-confirmed client location");
            return Err(ApiError::InvalidConfig);
        }
        Ok(Self {
            config,
            client_location,
            monitor,
            cache: Arc::new(FilterCache::new()),
        })
    }

    fn location_covers(config: &NearbyRouterConfig, location: &Location) -> bool {
        if config.match_level > MatchLevel::None && location.region.is_empty() {
            return false;
        }
        if config.match_level > MatchLevel::Region && location.zone.is_empty() {
            return false;
        }
        if config.match_level > MatchLevel::Zone && location.campus.is_empty() {
            return false;
        }
        true
    }

    /// Buckets candidates by how many locality levels they share with the
    /// caller. With nearby disabled every candidate lands in the top bucket.
    fn calculate_buckets(
        &self,
        location: Option<&Location>,
        candidates: &[Arc<Instance>],
        unfit: &std::collections::HashSet<String>,
    ) -> Vec<LevelBucket> {
        let match_level = self.config.match_level as usize;
        let mut buckets: Vec<LevelBucket> = (0..=match_level).map(|_| LevelBucket::default()).collect();
        for instance in candidates {
            let level = match location {
                None => match_level,
                Some(location) => {
                    let mut level = 0usize;
                    if match_level >= MatchLevel::Region as usize
                        && location.region == instance.region()
                    {
                        level += 1;
                        if match_level >= MatchLevel::Zone as usize
                            && location.zone == instance.zone()
                        {
                            level += 1;
                            if match_level >= MatchLevel::Campus as usize
                                && location.campus == instance.campus()
                            {
                                level += 1;
                            }
                        }
                    }
                    level
                }
            };
            if unfit.contains(instance.id()) {
                buckets[level].unhealthy.push(Arc::clone(instance));
            } else {
                buckets[level].healthy.push(Arc::clone(instance));
            }
        }
        buckets
    }

    /// Returns (result, level actually used, recover_all).
    fn calculate_result(&self, mut buckets: Vec<LevelBucket>) -> (Vec<Arc<Instance>>, usize, bool) {
        let max_level = self.config.max_match_level as usize;
        let mut level = self.config.match_level as usize;
        let mut total = buckets[level].healthy.len() + buckets[level].unhealthy.len();
        while total == 0 && level > max_level {
            level -= 1;
            total = buckets[level].healthy.len() + buckets[level].unhealthy.len();
        }
        if total == 0 {
            debug!(
                match_level = self.config.match_level as usize,
                max_match_level = max_level,
                "no instances available in any nearby level"
            );
            return (Vec::new(), level, false);
        }

        let mut unhealthy = buckets[level].unhealthy.len();
        let threshold = self.config.unhealthy_percent_to_degrade as usize;
        if self.config.enable_degrade_by_unhealthy_percent && unhealthy * 100 >= total * threshold {
            // Fold in coarser levels one at a time until the unhealthy share
            // drops below the threshold.
            let mut degrade_to: Option<usize> = None;
            let mut probe = level;
            while probe > max_level {
                probe -= 1;
                total += buckets[probe].healthy.len() + buckets[probe].unhealthy.len();
                unhealthy += buckets[probe].unhealthy.len();
                if unhealthy * 100 < total * threshold {
                    degrade_to = Some(probe);
                    break;
                }
            }
            if let Some(degrade_to) = degrade_to {
                let mut result = Vec::with_capacity(total - unhealthy);
                for bucket_level in (degrade_to..=level).rev() {
                    result.extend(buckets[bucket_level].healthy.iter().cloned());
                }
                return (result, degrade_to, true);
            }
        }

        if !buckets[level].healthy.is_empty() {
            let result = std::mem::take(&mut buckets[level].healthy);
            (result, level, level != self.config.match_level as usize)
        } else if self.config.enable_recover_all {
            let result = std::mem::take(&mut buckets[level].unhealthy);
            (result, level, true)
        } else {
            (Vec::new(), level, level != self.config.match_level as usize)
        }
    }
}

impl RouteFilter for NearbyFilter {
    fn name(&self) -> &'static str {
        "nearbyBasedRouter"
    }

    fn bit(&self) -> u8 {
        router_bit::NEARBY
    }

    fn filter(&self, route_info: &mut RouteInfo) -> ApiResult<()> {
        let instances = route_info.service_instances().ok_or(ApiError::InvalidState)?;
        let service_key = instances.service_data().service_key().clone();
        let nearby_enabled = instances.is_nearby_enabled();
        let (location, location_version) = self.client_location.versioned();

        let key = NearbyCacheKey {
            prior: instances.available().ptr_id(),
            // With nearby off for this service, location changes must not
            // invalidate the memo.
            location_version: if nearby_enabled { location_version } else { 0 },
            circuit_version: instances.service().circuit_breaker_version(),
            flags: route_info.request_flags(),
        };

        let value = match self.cache.get(&key) {
            Some(value) => value,
            None => {
                let prior = Arc::clone(instances.available());
                let unfit = unfit_instance_ids(route_info, instances);
                let buckets = self.calculate_buckets(
                    nearby_enabled.then_some(&location),
                    prior.instances(),
                    &unfit,
                );
                let (result, level, recover_all) = self.calculate_result(buckets);

                let mut subset = BTreeMap::new();
                subset.insert(
                    level_key(level).to_string(),
                    level_value(&location, level),
                );
                let current = if recover_all {
                    let from_level = self.config.match_level as usize;
                    let recover_info = format!(
                        "from {}:{}",
                        level_key(from_level),
                        level_value(&location, from_level)
                    );
                    Arc::new(InstancesSet::with_recover_info(result, subset, recover_info))
                } else {
                    Arc::new(InstancesSet::with_subset(result, subset))
                };
                report_recover_edge(
                    &self.monitor,
                    &service_key,
                    &prior,
                    recover_all,
                    &location.to_string(),
                );
                let value = Arc::new(SubsetCacheValue {
                    instances_data: Arc::clone(instances.service_data()),
                    prior,
                    current,
                });
                self.cache.put(key, Arc::clone(&value));
                value
            }
        };

        if nearby_enabled {
            value.current.record_hit();
        }
        let current = Arc::clone(&value.current);
        route_info
            .service_instances_mut()
            .ok_or(ApiError::InvalidState)?
            .update_available(current);
        Ok(())
    }

    fn clearable(&self) -> Arc<dyn ClearableCache> {
        Arc::clone(&self.cache) as _
    }
}
