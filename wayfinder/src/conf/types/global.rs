use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GlobalConfig {
    #[serde(default)]
    pub server_connector: ServerConnectorConfig,
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// Rolling-file directory; log to stdout when empty.
    #[serde(default)]
    pub dir: String,

    /// Level filter applied when the `WAYFINDER_LOG` env var is unset.
    #[serde(default = "log_default_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: String::new(),
            level: log_default_level(),
        }
    }
}

fn log_default_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerConnectorConfig {
    /// Control-plane endpoints, required.
    #[serde(default)]
    pub addresses: Vec<String>,

    /// Per-request timeout against the control plane.
    #[serde(default = "sc_default_connect_timeout_ms")]
    pub connect_timeout: u64,
}

fn sc_default_connect_timeout_ms() -> u64 {
    1_000
}

/// Well-known system services, each with its own refresh interval.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemConfig {
    #[serde(default = "default_discover_cluster")]
    pub discover_cluster: ClusterConfig,
    #[serde(default = "default_heartbeat_cluster")]
    pub heartbeat_cluster: ClusterConfig,
    #[serde(default = "default_monitor_cluster")]
    pub monitor_cluster: ClusterConfig,
    #[serde(default = "default_metric_cluster")]
    pub metric_cluster: ClusterConfig,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            discover_cluster: default_discover_cluster(),
            heartbeat_cluster: default_heartbeat_cluster(),
            monitor_cluster: default_monitor_cluster(),
            metric_cluster: default_metric_cluster(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    #[serde(default = "cluster_default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub service: String,
    #[serde(default = "cluster_default_refresh_interval_ms")]
    pub refresh_interval: u64,
}

fn cluster_default_namespace() -> String {
    "System".to_string()
}

fn cluster_default_refresh_interval_ms() -> u64 {
    10 * 60 * 1_000
}

fn default_discover_cluster() -> ClusterConfig {
    ClusterConfig {
        namespace: cluster_default_namespace(),
        service: "system.discover".to_string(),
        refresh_interval: cluster_default_refresh_interval_ms(),
    }
}

fn default_heartbeat_cluster() -> ClusterConfig {
    ClusterConfig {
        namespace: cluster_default_namespace(),
        service: "system.healthcheck".to_string(),
        refresh_interval: cluster_default_refresh_interval_ms(),
    }
}

fn default_monitor_cluster() -> ClusterConfig {
    ClusterConfig {
        namespace: cluster_default_namespace(),
        service: "system.monitor".to_string(),
        refresh_interval: cluster_default_refresh_interval_ms(),
    }
}

fn default_metric_cluster() -> ClusterConfig {
    ClusterConfig {
        namespace: cluster_default_namespace(),
        service: "system.metric".to_string(),
        refresh_interval: cluster_default_refresh_interval_ms(),
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    /// Default per-call timeout in ms, applied when a request carries none.
    #[serde(default = "api_default_timeout_ms")]
    pub timeout: u64,

    #[serde(default = "api_default_max_retry_times")]
    pub max_retry_times: u32,

    #[serde(default = "api_default_retry_interval_ms")]
    pub retry_interval: u64,

    /// Client location re-report period in ms.
    #[serde(default = "api_default_report_interval_ms")]
    pub report_interval: u64,

    /// TTL for unused plugin caches in ms.
    #[serde(default = "api_default_cache_clear_time_ms")]
    pub cache_clear_time: u64,

    /// Interface to resolve the bind address from, when `bindIP` is unset.
    #[serde(default)]
    pub bind_if: String,

    #[serde(default, rename = "bindIP")]
    pub bind_ip: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            timeout: api_default_timeout_ms(),
            max_retry_times: api_default_max_retry_times(),
            retry_interval: api_default_retry_interval_ms(),
            report_interval: api_default_report_interval_ms(),
            cache_clear_time: api_default_cache_clear_time_ms(),
            bind_if: String::new(),
            bind_ip: String::new(),
        }
    }
}

fn api_default_timeout_ms() -> u64 {
    1_000
}

fn api_default_max_retry_times() -> u32 {
    5
}

fn api_default_retry_interval_ms() -> u64 {
    100
}

fn api_default_report_interval_ms() -> u64 {
    10 * 60 * 1_000
}

fn api_default_cache_clear_time_ms() -> u64 {
    60 * 1_000
}
