use crate::health::HealthChecker;
use crate::model::Instance;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Connect-probe: an instance is healthy when its endpoint accepts a TCP
/// connection within the timeout.
pub struct TcpChecker;

impl HealthChecker for TcpChecker {
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn detect(&self, instance: &Instance, timeout: Duration) -> bool {
        let target = format!("{}:{}", instance.host(), instance.port());
        let Ok(mut addrs) = target.to_socket_addrs() else {
            return false;
        };
        let Some(addr) = addrs.next() else {
            return false;
        };
        TcpStream::connect_timeout(&addr, timeout).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InstanceSpec;
    use std::collections::BTreeMap;
    use std::net::TcpListener;

    fn instance(host: &str, port: u16) -> Instance {
        Instance::from_spec(InstanceSpec {
            id: "i-1".into(),
            host: host.into(),
            port,
            weight: 100,
            metadata: BTreeMap::new(),
            region: String::new(),
            zone: String::new(),
            campus: String::new(),
            healthy: true,
            isolated: false,
            priority: 0,
        })
    }

    #[test]
    fn test_detect_listening_endpoint() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let checker = TcpChecker;
        assert!(checker.detect(&instance("127.0.0.1", port), Duration::from_millis(500)));
    }

    #[test]
    fn test_detect_closed_endpoint() {
        // Bind-then-drop to find a port that is very likely closed.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let checker = TcpChecker;
        assert!(!checker.detect(&instance("127.0.0.1", port), Duration::from_millis(200)));
    }
}
