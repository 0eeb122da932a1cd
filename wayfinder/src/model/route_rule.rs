use crate::model::ServiceKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Matches a calling service. Empty/absent fields match anything; a literal
/// `*` value in metadata matches any value for that key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSource {
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl RuleSource {
    pub fn matches(
        &self,
        caller: Option<&ServiceKey>,
        caller_metadata: &BTreeMap<String, String>,
    ) -> bool {
        if let Some(want) = &self.namespace
            && want != "*"
            && caller.map(|k| &k.namespace) != Some(want)
        {
            return false;
        }
        if let Some(want) = &self.service
            && want != "*"
            && caller.map(|k| &k.name) != Some(want)
        {
            return false;
        }
        self.metadata.iter().all(|(key, want)| {
            want == "*" || caller_metadata.get(key).is_some_and(|have| have == want)
        })
    }
}

fn default_rule_weight() -> u32 {
    crate::route::DEFAULT_RULE_WEIGHT
}

fn default_rule_priority() -> u32 {
    crate::route::DEFAULT_RULE_PRIORITY
}

/// A destination subset: instances matching `metadata`, weighted within the
/// same priority group. Lower `priority` values are preferred.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDestination {
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default = "default_rule_weight")]
    pub weight: u32,
    #[serde(default = "default_rule_priority")]
    pub priority: u32,
    #[serde(default)]
    pub isolate: bool,
}

impl RuleDestination {
    pub fn selects(&self, instance_metadata: &BTreeMap<String, String>) -> bool {
        self.metadata.iter().all(|(key, want)| {
            want == "*" || instance_metadata.get(key).is_some_and(|have| have == want)
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteRule {
    #[serde(default)]
    pub sources: Vec<RuleSource>,
    #[serde(default)]
    pub destinations: Vec<RuleDestination>,
}

impl RouteRule {
    /// A rule with no sources applies to every caller.
    pub fn matches_source(
        &self,
        caller: Option<&ServiceKey>,
        caller_metadata: &BTreeMap<String, String>,
    ) -> bool {
        self.sources.is_empty()
            || self
                .sources
                .iter()
                .any(|source| source.matches(caller, caller_metadata))
    }
}

/// Control-plane reply for the `RouteRule` data kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteReply {
    #[serde(default)]
    pub revision: String,
    /// Rules applied when this service is the callee.
    #[serde(default)]
    pub inbounds: Vec<RouteRule>,
    /// Rules applied when this service is the caller.
    #[serde(default)]
    pub outbounds: Vec<RouteRule>,
}

#[derive(Debug, Clone, Default)]
pub struct RouteRuleData {
    pub inbounds: Vec<RouteRule>,
    pub outbounds: Vec<RouteRule>,
}

impl RouteRuleData {
    pub fn from_reply(reply: &RouteReply) -> Self {
        Self {
            inbounds: reply.inbounds.clone(),
            outbounds: reply.outbounds.clone(),
        }
    }

    pub fn to_reply(&self, revision: &str) -> RouteReply {
        RouteReply {
            revision: revision.to_string(),
            inbounds: self.inbounds.clone(),
            outbounds: self.outbounds.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inbounds.is_empty() && self.outbounds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_source_wildcard_matches_any_value() {
        let source = RuleSource {
            namespace: None,
            service: None,
            metadata: meta(&[("env", "*")]),
        };
        assert!(source.matches(None, &meta(&[("env", "prod")])));
        assert!(!source.matches(None, &meta(&[("region", "east")])));
    }

    #[test]
    fn test_rule_without_sources_matches_everyone() {
        let rule = RouteRule {
            sources: vec![],
            destinations: vec![],
        };
        assert!(rule.matches_source(None, &BTreeMap::new()));
    }

    #[test]
    fn test_source_service_must_match() {
        let source = RuleSource {
            namespace: Some("Test".into()),
            service: Some("caller".into()),
            metadata: BTreeMap::new(),
        };
        let caller = ServiceKey::new("Test", "caller");
        let other = ServiceKey::new("Test", "other");
        assert!(source.matches(Some(&caller), &BTreeMap::new()));
        assert!(!source.matches(Some(&other), &BTreeMap::new()));
        assert!(!source.matches(None, &BTreeMap::new()));
    }
}
