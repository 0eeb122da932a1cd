use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Physical location of an instance or of this client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub campus: String,
}

impl Location {
    pub fn is_empty(&self) -> bool {
        self.region.is_empty() && self.zone.is_empty() && self.campus.is_empty()
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.region, self.zone, self.campus)
    }
}

/// The client's own location, re-reported by the control plane. The version
/// bumps on every effective change so nearby-filter caches keyed on it miss.
#[derive(Debug, Default)]
pub struct ClientLocation {
    inner: Mutex<Location>,
    version: AtomicU64,
}

impl ClientLocation {
    pub fn new(initial: Location) -> Self {
        let version = if initial.is_empty() { 0 } else { 1 };
        Self {
            inner: Mutex::new(initial),
            version: AtomicU64::new(version),
        }
    }

    /// Returns true when the stored location actually changed.
    pub fn update(&self, location: Location) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if *inner == location {
            return false;
        }
        *inner = location;
        self.version.fetch_add(1, Ordering::AcqRel);
        true
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn get(&self) -> Location {
        self.inner.lock().unwrap().clone()
    }

    pub fn versioned(&self) -> (Location, u64) {
        let inner = self.inner.lock().unwrap();
        (inner.clone(), self.version.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_bumps_only_on_change() {
        let client = ClientLocation::default();
        let loc = Location {
            region: "south".into(),
            zone: "gz".into(),
            campus: String::new(),
        };
        assert!(client.update(loc.clone()));
        let v = client.version();
        assert!(!client.update(loc));
        assert_eq!(client.version(), v);
    }
}
