//! Common test utilities and fixtures
//!
//! Fixture paths, SDP samples and helpers for running several relays
//! against one shared in-memory directory.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use signalhub::config::RelayConfig;
use signalhub::directory::MemoryStore;
use signalhub::peer::{Client, ClientOptions};
use signalhub::Relay;
use tokio::sync::mpsc;

/// Get the path to the test fixtures directory
pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
}

/// Get a path to a specific fixture file
pub fn fixture_path(name: &str) -> PathBuf {
    fixtures_dir().join(name)
}

/// Get the valid config fixture path
pub fn valid_config_fixture() -> PathBuf {
    fixture_path("valid_config.toml")
}

/// Get the invalid config fixture path
pub fn invalid_config_fixture() -> PathBuf {
    fixture_path("invalid_config.toml")
}

/// An SDP fixture with CRLF line endings, as browsers produce it
pub fn sdp_fixture(name: &str) -> String {
    let raw = std::fs::read_to_string(fixture_path(name)).unwrap();
    let mut sdp = raw.lines().collect::<Vec<_>>().join("\r\n");
    sdp.push_str("\r\n");
    sdp
}

/// ICE candidate lines, one per fixture line
pub fn candidate_fixtures() -> Vec<String> {
    std::fs::read_to_string(fixture_path("candidates.txt"))
        .unwrap()
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .collect()
}

// ─────────────────────────────────────────────────────────────────
// Relay Helpers
// ─────────────────────────────────────────────────────────────────

/// Config for a relay process named `address` with short flush and drain
/// periods
pub fn relay_config(address: &str) -> RelayConfig {
    let mut config = RelayConfig::default();
    config.server.bind = vec!["127.0.0.1:0".to_string()];
    config.directory.node_address = Some(address.to_string());
    config.relay.flush_interval_ms = 10;
    config.relay.drain_block_secs = 1;
    config
}

/// Start one relay per address, all sharing a single directory store
pub async fn relay_cluster(addresses: &[&str]) -> (Arc<MemoryStore>, Vec<Arc<Relay>>) {
    let store = Arc::new(MemoryStore::new());
    let relays = addresses
        .iter()
        .map(|address| Relay::start(relay_config(address), store.clone()))
        .collect();
    // let every relay publish its first client count
    tokio::time::sleep(Duration::from_millis(50)).await;
    (store, relays)
}

/// Register a socket client on `relay` and return its outbound frames
pub async fn connect(relay: &Relay, peer_id: &str, options: ClientOptions) -> (Arc<Client>, mpsc::Receiver<String>) {
    let (tx, rx) = mpsc::channel(64);
    let client = Client::socket(peer_id, options, tx);
    relay.hub().register(client.clone()).await;
    (client, rx)
}

/// Next frame sent to a client, parsed
pub async fn next_json(rx: &mut mpsc::Receiver<String>) -> Value {
    let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("client channel closed");
    serde_json::from_str(&frame).unwrap()
}

/// Assert nothing arrives within `wait`
pub async fn assert_silent(rx: &mut mpsc::Receiver<String>, wait: Duration) {
    if let Ok(Some(frame)) = tokio::time::timeout(wait, rx.recv()).await {
        panic!("unexpected frame: {}", frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixtures_dir_exists() {
        assert!(fixtures_dir().exists(), "Fixtures directory should exist");
    }

    #[test]
    fn test_valid_config_exists() {
        assert!(
            valid_config_fixture().exists(),
            "Valid config fixture should exist"
        );
    }

    #[test]
    fn test_invalid_config_exists() {
        assert!(
            invalid_config_fixture().exists(),
            "Invalid config fixture should exist"
        );
    }

    #[test]
    fn test_sdp_fixture_uses_crlf() {
        let sdp = sdp_fixture("offer.sdp");
        assert!(sdp.starts_with("v=0\r\n"));
        assert!(sdp.ends_with("\r\n"));
        assert!(!sdp.contains("\r\r"));
    }
}
