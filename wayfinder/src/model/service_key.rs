use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Logical service identifier. Used as map key and carried in every request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceKey {
    pub namespace: String,
    pub name: String,
}

impl ServiceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl Display for ServiceKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Sub-resources independently fetchable for a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DataKind {
    Instances,
    RouteRule,
    RateLimit,
    CircuitBreakerConfig,
}

impl DataKind {
    pub const ALL: [DataKind; 4] = [
        DataKind::Instances,
        DataKind::RouteRule,
        DataKind::RateLimit,
        DataKind::CircuitBreakerConfig,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::Instances => "instances",
            DataKind::RouteRule => "routing",
            DataKind::RateLimit => "rate_limit",
            DataKind::CircuitBreakerConfig => "circuit_breaker",
        }
    }
}

impl Display for DataKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
