use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    // IO
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Parsing
    #[error("failed to parse YAML config: {source}")]
    Parse {
        #[source]
        source: serde_yaml::Error,
    },

    // Validation
    #[error("global.serverConnector.addresses must not be empty")]
    EmptyConnectorAddresses,

    #[error("unknown service router '{name}' in consumer.serviceRouter.chain")]
    UnknownRouter { name: String },

    #[error("unknown load balancer type '{name}'")]
    UnknownLoadBalancer { name: String },

    #[error("unknown circuit breaker plugin '{name}' in consumer.circuitBreaker.chain")]
    UnknownBreaker { name: String },

    #[error("{key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },

    #[error("duplicate per-service override for {namespace}/{name}")]
    DuplicateServiceOverride { namespace: String, name: String },
}

impl ConfigError {
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadFile {
            path: path.into(),
            source,
        }
    }

    pub fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key,
            reason: reason.into(),
        }
    }
}
