use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerConfig {
    #[serde(default)]
    pub service_router: ServiceRouterConfig,
    #[serde(default)]
    pub load_balancer: LoadBalancerConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    #[serde(default)]
    pub local_cache: LocalCacheConfig,
    #[serde(default)]
    pub weight_adjuster: WeightAdjusterConfig,
    /// Per-service overrides; a present section fully replaces the global
    /// section for that service.
    #[serde(default)]
    pub service: Vec<ServiceOverrideConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceOverrideConfig {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub service_router: Option<ServiceRouterConfig>,
    #[serde(default)]
    pub load_balancer: Option<LoadBalancerConfig>,
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    #[serde(default)]
    pub health_check: Option<HealthCheckConfig>,
    #[serde(default)]
    pub weight_adjuster: Option<WeightAdjusterConfig>,
}

///////////////////////////////////////////////////////////////////////////////
// Service router

pub const ROUTER_RULE: &str = "ruleBasedRouter";
pub const ROUTER_NEARBY: &str = "nearbyBasedRouter";
pub const ROUTER_SET_DIVISION: &str = "setDivisionRouter";
pub const ROUTER_CANARY: &str = "canaryRouter";
pub const ROUTER_METADATA: &str = "metadataRouter";

pub const KNOWN_ROUTERS: [&str; 5] = [
    ROUTER_RULE,
    ROUTER_NEARBY,
    ROUTER_SET_DIVISION,
    ROUTER_CANARY,
    ROUTER_METADATA,
];

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRouterConfig {
    #[serde(default = "sr_default_enable")]
    pub enable: bool,

    /// Ordered filter chain.
    #[serde(default = "sr_default_chain")]
    pub chain: Vec<String>,

    /// Return the full (possibly unhealthy) list instead of nothing when
    /// filtering removes every candidate.
    #[serde(default = "sr_default_enable_recover_all")]
    pub enable_recover_all: bool,

    #[serde(default)]
    pub percent_of_min_instances: f64,

    #[serde(default)]
    pub nearby_based_router: NearbyRouterConfig,
}

impl Default for ServiceRouterConfig {
    fn default() -> Self {
        Self {
            enable: sr_default_enable(),
            chain: sr_default_chain(),
            enable_recover_all: sr_default_enable_recover_all(),
            percent_of_min_instances: 0.0,
            nearby_based_router: NearbyRouterConfig::default(),
        }
    }
}

fn sr_default_enable() -> bool {
    true
}

fn sr_default_chain() -> Vec<String> {
    vec![ROUTER_RULE.to_string(), ROUTER_NEARBY.to_string()]
}

fn sr_default_enable_recover_all() -> bool {
    true
}

/// Locality levels ordered from coarse to fine; `matchLevel` must not be
/// coarser than `maxMatchLevel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchLevel {
    None,
    Region,
    Zone,
    Campus,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyRouterConfig {
    #[serde(default = "nearby_default_match_level")]
    pub match_level: MatchLevel,

    /// Coarsest level degradation may fall back to.
    #[serde(default = "nearby_default_max_match_level")]
    pub max_match_level: MatchLevel,

    /// Requires a server-confirmed client location at startup and disables
    /// level degradation.
    #[serde(default)]
    pub strict_nearby: bool,

    #[serde(default = "nearby_default_enable_degrade")]
    pub enable_degrade_by_unhealthy_percent: bool,

    /// Degrade one level once this share of the candidates is unhealthy.
    #[serde(default = "nearby_default_unhealthy_percent")]
    pub unhealthy_percent_to_degrade: u32,

    #[serde(default = "nearby_default_enable_recover_all")]
    pub enable_recover_all: bool,
}

impl Default for NearbyRouterConfig {
    fn default() -> Self {
        Self {
            match_level: nearby_default_match_level(),
            max_match_level: nearby_default_max_match_level(),
            strict_nearby: false,
            enable_degrade_by_unhealthy_percent: nearby_default_enable_degrade(),
            unhealthy_percent_to_degrade: nearby_default_unhealthy_percent(),
            enable_recover_all: nearby_default_enable_recover_all(),
        }
    }
}

fn nearby_default_match_level() -> MatchLevel {
    MatchLevel::Zone
}

fn nearby_default_max_match_level() -> MatchLevel {
    MatchLevel::None
}

fn nearby_default_enable_degrade() -> bool {
    true
}

fn nearby_default_unhealthy_percent() -> u32 {
    100
}

fn nearby_default_enable_recover_all() -> bool {
    true
}

///////////////////////////////////////////////////////////////////////////////
// Load balancer

pub const LB_WEIGHTED_RANDOM: &str = "weightedRandom";
pub const LB_RING_HASH: &str = "ringHash";
pub const LB_L5_CST_HASH: &str = "l5CstHash";
pub const LB_C_MURMUR_HASH: &str = "cMurmurHash";
pub const LB_MAGLEV: &str = "maglev";
pub const LB_LOCALITY_AWARE: &str = "localityAware";

pub const KNOWN_LOAD_BALANCERS: [&str; 6] = [
    LB_WEIGHTED_RANDOM,
    LB_RING_HASH,
    LB_L5_CST_HASH,
    LB_C_MURMUR_HASH,
    LB_MAGLEV,
    LB_LOCALITY_AWARE,
];

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerConfig {
    #[serde(rename = "type", default = "lb_default_type")]
    pub kind: String,

    /// Virtual nodes per instance for the ring-hash family.
    #[serde(default = "lb_default_vnode_count")]
    pub vnode_count: u32,

    /// Hash function for the ring: `murmur3` or `crc32`.
    #[serde(default = "lb_default_hash_func")]
    pub hash_func: String,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            kind: lb_default_type(),
            vnode_count: lb_default_vnode_count(),
            hash_func: lb_default_hash_func(),
        }
    }
}

fn lb_default_type() -> String {
    LB_WEIGHTED_RANDOM.to_string()
}

fn lb_default_vnode_count() -> u32 {
    100
}

fn lb_default_hash_func() -> String {
    "murmur3".to_string()
}

///////////////////////////////////////////////////////////////////////////////
// Circuit breaker

pub const BREAKER_ERROR_COUNT: &str = "errorCount";
pub const BREAKER_ERROR_RATE: &str = "errorRate";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerConfig {
    #[serde(default = "cb_default_enable")]
    pub enable: bool,

    /// Timing-cycle period in ms.
    #[serde(default = "cb_default_check_period_ms")]
    pub check_period: u64,

    #[serde(default = "cb_default_chain")]
    pub chain: Vec<String>,

    #[serde(default)]
    pub error_count: ErrorCountConfig,

    #[serde(default)]
    pub error_rate: ErrorRateConfig,

    #[serde(default)]
    pub set_circuit_breaker: SetBreakerConfig,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enable: cb_default_enable(),
            check_period: cb_default_check_period_ms(),
            chain: cb_default_chain(),
            error_count: ErrorCountConfig::default(),
            error_rate: ErrorRateConfig::default(),
            set_circuit_breaker: SetBreakerConfig::default(),
        }
    }
}

fn cb_default_enable() -> bool {
    true
}

fn cb_default_check_period_ms() -> u64 {
    1_000
}

fn cb_default_chain() -> Vec<String> {
    vec![BREAKER_ERROR_COUNT.to_string(), BREAKER_ERROR_RATE.to_string()]
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorCountConfig {
    /// Consecutive failures in closed state before the circuit opens.
    #[serde(default = "ec_default_continuous_error_threshold")]
    pub continuous_error_threshold: u32,

    /// How long the circuit stays open before half-open probing, ms.
    #[serde(default = "ec_default_sleep_window_ms")]
    pub sleep_window: u64,

    /// Probe budget granted when entering half-open; all probes must
    /// succeed to close again.
    #[serde(default = "ec_default_request_after_half_open")]
    pub request_count_after_half_open: u32,

    /// Stats for an instance without traffic are dropped after this, ms.
    #[serde(default = "ec_default_metric_expired_time_ms")]
    pub metric_expired_time: u64,
}

impl Default for ErrorCountConfig {
    fn default() -> Self {
        Self {
            continuous_error_threshold: ec_default_continuous_error_threshold(),
            sleep_window: ec_default_sleep_window_ms(),
            request_count_after_half_open: ec_default_request_after_half_open(),
            metric_expired_time: ec_default_metric_expired_time_ms(),
        }
    }
}

fn ec_default_continuous_error_threshold() -> u32 {
    10
}

fn ec_default_sleep_window_ms() -> u64 {
    5_000
}

fn ec_default_request_after_half_open() -> u32 {
    3
}

fn ec_default_metric_expired_time_ms() -> u64 {
    60 * 60 * 1_000
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRateConfig {
    /// Minimum calls inside the window before the rate is judged.
    #[serde(default = "er_default_request_volume_threshold")]
    pub request_volume_threshold: u32,

    #[serde(default = "er_default_error_rate_threshold")]
    pub error_rate_threshold: f64,

    /// Sliding window length in ms, split into `metricNumBuckets` buckets.
    #[serde(default = "er_default_stat_time_window_ms")]
    pub metric_stat_time_window: u64,

    #[serde(default = "er_default_num_buckets")]
    pub metric_num_buckets: u32,

    #[serde(default = "er_default_sleep_window_ms")]
    pub sleep_window: u64,

    #[serde(default = "er_default_request_after_half_open")]
    pub request_count_after_half_open: u32,
}

impl Default for ErrorRateConfig {
    fn default() -> Self {
        Self {
            request_volume_threshold: er_default_request_volume_threshold(),
            error_rate_threshold: er_default_error_rate_threshold(),
            metric_stat_time_window: er_default_stat_time_window_ms(),
            metric_num_buckets: er_default_num_buckets(),
            sleep_window: er_default_sleep_window_ms(),
            request_count_after_half_open: er_default_request_after_half_open(),
        }
    }
}

fn er_default_request_volume_threshold() -> u32 {
    10
}

fn er_default_error_rate_threshold() -> f64 {
    0.5
}

fn er_default_stat_time_window_ms() -> u64 {
    60 * 1_000
}

fn er_default_num_buckets() -> u32 {
    12
}

fn er_default_sleep_window_ms() -> u64 {
    3_000
}

fn er_default_request_after_half_open() -> u32 {
    3
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakerConfig {
    #[serde(default)]
    pub enable: bool,

    #[serde(default = "er_default_error_rate_threshold")]
    pub error_rate_threshold: f64,

    #[serde(default = "er_default_request_volume_threshold")]
    pub request_volume_threshold: u32,

    #[serde(default = "er_default_sleep_window_ms")]
    pub sleep_window: u64,

    #[serde(default = "er_default_request_after_half_open")]
    pub request_count_after_half_open: u32,
}

impl Default for SetBreakerConfig {
    fn default() -> Self {
        Self {
            enable: false,
            error_rate_threshold: er_default_error_rate_threshold(),
            request_volume_threshold: er_default_request_volume_threshold(),
            sleep_window: er_default_sleep_window_ms(),
            request_count_after_half_open: er_default_request_after_half_open(),
        }
    }
}

///////////////////////////////////////////////////////////////////////////////
// Health check

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthCheckWhen {
    Never,
    OnRecover,
    Always,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckConfig {
    #[serde(default = "hc_default_when")]
    pub when: HealthCheckWhen,

    #[serde(default = "hc_default_interval_ms")]
    pub interval: u64,

    #[serde(default = "hc_default_timeout_ms")]
    pub timeout: u64,

    #[serde(default = "hc_default_chain")]
    pub chain: Vec<String>,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            when: hc_default_when(),
            interval: hc_default_interval_ms(),
            timeout: hc_default_timeout_ms(),
            chain: hc_default_chain(),
        }
    }
}

fn hc_default_when() -> HealthCheckWhen {
    HealthCheckWhen::Never
}

fn hc_default_interval_ms() -> u64 {
    10_000
}

fn hc_default_timeout_ms() -> u64 {
    500
}

fn hc_default_chain() -> Vec<String> {
    vec!["tcp".to_string()]
}

///////////////////////////////////////////////////////////////////////////////
// Local cache

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalCacheConfig {
    #[serde(default = "lc_default_persist_dir")]
    pub persist_dir: String,

    /// Unused service entries are torn down after this, ms. Must be ≥ 60s.
    #[serde(default = "lc_default_service_expire_time_ms")]
    pub service_expire_time: u64,

    /// Default control-plane refresh interval, ms. Must be ≥ 100ms.
    #[serde(default = "lc_default_service_refresh_interval_ms")]
    pub service_refresh_interval: u64,

    #[serde(default = "lc_default_persist_available_time_ms")]
    pub persist_available_time: u64,

    #[serde(default = "lc_default_persist_max_write_retry")]
    pub persist_max_write_retry: u32,

    #[serde(default = "lc_default_persist_retry_interval_ms")]
    pub persist_retry_interval: u64,
}

impl Default for LocalCacheConfig {
    fn default() -> Self {
        Self {
            persist_dir: lc_default_persist_dir(),
            service_expire_time: lc_default_service_expire_time_ms(),
            service_refresh_interval: lc_default_service_refresh_interval_ms(),
            persist_available_time: lc_default_persist_available_time_ms(),
            persist_max_write_retry: lc_default_persist_max_write_retry(),
            persist_retry_interval: lc_default_persist_retry_interval_ms(),
        }
    }
}

fn lc_default_persist_dir() -> String {
    "./wayfinder/backup".to_string()
}

fn lc_default_service_expire_time_ms() -> u64 {
    24 * 60 * 60 * 1_000
}

fn lc_default_service_refresh_interval_ms() -> u64 {
    2_000
}

fn lc_default_persist_available_time_ms() -> u64 {
    10 * 60 * 1_000
}

fn lc_default_persist_max_write_retry() -> u32 {
    1
}

fn lc_default_persist_retry_interval_ms() -> u64 {
    1_000
}

///////////////////////////////////////////////////////////////////////////////
// Weight adjuster (slow start)

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightAdjusterConfig {
    #[serde(default)]
    pub enable: bool,

    /// Ramp window in ms; floored to 10s.
    #[serde(default = "wa_default_window_ms")]
    pub window: u64,

    /// Adjustment tick in ms; floored to 1s.
    #[serde(default = "wa_default_step_size_ms")]
    pub step_size: u64,

    /// Ramp curve exponent, in (0, 1].
    #[serde(default = "wa_default_aggression")]
    pub aggression: f64,

    #[serde(default = "wa_default_min_weight_percent")]
    pub min_weight_percent: f64,
}

impl Default for WeightAdjusterConfig {
    fn default() -> Self {
        Self {
            enable: false,
            window: wa_default_window_ms(),
            step_size: wa_default_step_size_ms(),
            aggression: wa_default_aggression(),
            min_weight_percent: wa_default_min_weight_percent(),
        }
    }
}

fn wa_default_window_ms() -> u64 {
    60 * 1_000
}

fn wa_default_step_size_ms() -> u64 {
    10 * 1_000
}

fn wa_default_aggression() -> f64 {
    1.0
}

fn wa_default_min_weight_percent() -> f64 {
    0.1
}
