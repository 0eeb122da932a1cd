use integration_tests::harness::MockControlPlane;
use std::path::Path;
use std::sync::{Arc, Once};
use wayfinder::monitor::RecordingSink;
use wayfinder::{ClientConfig, DiscoveryClient};

static LOGGING: Once = Once::new();

/// Debug output for failing runs: `RUST_LOG=wayfinder=debug cargo test`.
/// Installed before any client is built, so the client's own subscriber
/// install backs off and test output stays captured.
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Base config pointing at the mock control plane, with the persist dir
/// substituted in. `extra` is appended verbatim for per-test overrides.
pub fn config_yaml(persist_dir: &Path, extra: &str) -> String {
    format!(
        r#"
global:
  serverConnector:
    addresses: ["127.0.0.1:8091"]
consumer:
  localCache:
    persistDir: "{}"
{extra}"#,
        persist_dir.display()
    )
}

#[allow(dead_code)]
pub fn new_client(plane: &Arc<MockControlPlane>, persist_dir: &Path, extra: &str) -> DiscoveryClient {
    init_test_logging();
    let config = ClientConfig::from_yaml_str(&config_yaml(persist_dir, extra)).unwrap();
    DiscoveryClient::new(config, Arc::clone(plane) as _).unwrap()
}

#[allow(dead_code)]
pub fn new_client_with_monitor(
    plane: &Arc<MockControlPlane>,
    persist_dir: &Path,
    extra: &str,
) -> (DiscoveryClient, Arc<RecordingSink>) {
    init_test_logging();
    let config = ClientConfig::from_yaml_str(&config_yaml(persist_dir, extra)).unwrap();
    let monitor = Arc::new(RecordingSink::default());
    let client =
        DiscoveryClient::with_monitor(config, Arc::clone(plane) as _, Arc::clone(&monitor) as _)
            .unwrap();
    (client, monitor)
}

/// Seeds the client's own location on disk, as a previous run would have.
#[allow(dead_code)]
pub fn write_location(persist_dir: &Path, region: &str, zone: &str) {
    std::fs::create_dir_all(persist_dir).unwrap();
    let location = serde_json::json!({
        "region": region,
        "zone": zone,
        "campus": "",
    });
    std::fs::write(
        persist_dir.join("location.json"),
        serde_json::to_string_pretty(&location).unwrap(),
    )
    .unwrap();
}
