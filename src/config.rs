//! Configuration system for SignalHub
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables (SIGNALHUB_* prefix)
//! 3. Configuration file (TOML)
//! 4. Default values

use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Main relay configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// HTTP / WebSocket listener settings
    pub server: ServerSettings,

    /// Shared peer directory settings
    pub directory: DirectorySettings,

    /// Routing, batching and expiry tuning
    pub relay: RelaySettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Socket addresses to listen on
    pub bind: Vec<String>,

    /// Accept the compaction flag (`c=1`) from clients
    pub compaction_enabled: bool,

    /// Expose /info, /count, /total_count and /version
    pub stats_enabled: bool,

    /// Token required by the stats endpoints (unset = open)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats_token: Option<String>,

    /// Maximum inbound WebSocket message size in bytes
    pub websocket_max_message_bytes: usize,

    /// Outbound frames buffered per socket before a send is refused
    pub socket_send_buffer: usize,
}

/// Directory store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryBackend {
    /// In-process store, single worker only
    Memory,
    /// Shared Redis instance (requires the `redis-store` feature)
    Redis,
}

/// Shared peer directory settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorySettings {
    /// Store backend
    pub backend: DirectoryBackend,

    /// Store URL (redis://host:port/db)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// This process's address in the directory (default: <hostname>-<pid>)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_address: Option<String>,

    /// TTL of a peer presence record in seconds
    pub peer_ttl_secs: u64,

    /// TTL of this process's live-client counter in seconds
    pub stats_ttl_secs: u64,

    /// How long the breaker stays open after a store error (ms)
    pub breaker_window_ms: u64,

    /// Capacity of the peer location cache
    pub cache_capacity: usize,
}

/// Routing, batching and expiry tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Items per remote batch before a size-triggered flush
    pub batch_size: usize,

    /// Base flush interval of a remote node's aggregator (ms)
    pub flush_interval_ms: u64,

    /// Quiet period after which a widened flush interval resets (s)
    pub backoff_reset_secs: u64,

    /// Queue length that triggers trimming and congestion mode
    pub queue_high_water: u64,

    /// Queue length kept after a trim
    pub queue_low_water: u64,

    /// Queue length at which congestion mode ends
    pub queue_resume_len: u64,

    /// Remote node heartbeat period (ms)
    pub heartbeat_interval_ms: u64,

    /// Failed heartbeats tolerated before a node is declared dead
    pub heartbeat_max_retries: u32,

    /// Blocking-pop wait on the inbound queue (s)
    pub drain_block_secs: u64,

    /// Expiry sweep period (s), jittered by up to 10s
    pub sweep_interval_secs: u64,

    /// Live-client counter publish period (ms), jittered by up to 500ms
    pub publish_count_interval_ms: u64,

    /// Delay before queued polling messages are flushed (ms)
    pub polling_linger_ms: u64,

    /// Maximum time a long-poll request is held open (s)
    pub polling_hold_secs: u64,

    /// Messages queued per polling client before sends are refused
    pub polling_queue_size: usize,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log file path (empty = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Number of rotated log files to keep
    pub max_files: u32,

    /// Enable JSON formatted logging
    pub json_format: bool,
}

// Default implementations

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: vec!["0.0.0.0:8080".to_string()],
            compaction_enabled: true,
            stats_enabled: true,
            stats_token: None,
            websocket_max_message_bytes: 128 * 1024,
            socket_send_buffer: 256,
        }
    }
}

impl Default for DirectorySettings {
    fn default() -> Self {
        Self {
            backend: DirectoryBackend::Memory,
            url: None,
            node_address: None,
            peer_ttl_secs: 10 * 60,
            stats_ttl_secs: 20,
            breaker_window_ms: 2000,
            cache_capacity: 80_000,
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            batch_size: 800,
            flush_interval_ms: 60,
            backoff_reset_secs: 90,
            queue_high_water: 300,
            queue_low_water: 100,
            queue_resume_len: 50,
            heartbeat_interval_ms: 7000,
            heartbeat_max_retries: 2,
            drain_block_secs: 7,
            sweep_interval_secs: 6 * 60,
            publish_count_interval_ms: 7000,
            polling_linger_ms: 200,
            polling_hold_secs: 97,
            polling_queue_size: 30,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            max_files: 5,
            json_format: false,
        }
    }
}

impl DirectorySettings {
    /// The address other processes use to reach this one
    pub fn resolved_node_address(&self) -> String {
        self.node_address.clone().unwrap_or_else(default_node_address)
    }

    pub fn breaker_window(&self) -> Duration {
        Duration::from_millis(self.breaker_window_ms)
    }
}

impl RelaySettings {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn drain_block(&self) -> Duration {
        Duration::from_secs(self.drain_block_secs)
    }

    pub fn polling_linger(&self) -> Duration {
        Duration::from_millis(self.polling_linger_ms)
    }

    pub fn polling_hold(&self) -> Duration {
        Duration::from_secs(self.polling_hold_secs)
    }
}

/// `<hostname>-<pid>`; `:` is reserved as the peer-record separator
pub fn default_node_address() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());
    format!("{}-{}", host.replace(':', "_"), std::process::id())
}

impl RelayConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = Self::find_config_file(config_path)? {
            debug!(path = %path.display(), "Loading configuration file");
            let content = fs::read_to_string(&path)?;
            config = toml::from_str(&content).map_err(|e| {
                Error::config_parse(format!("{}: {}", path.display(), e.message()), Some(e))
            })?;
            info!(path = %path.display(), "Configuration loaded from file");
        }

        config.apply_env_overrides();
        config.expand_paths();
        config.validate()?;

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit_path {
            let path = PathBuf::from(expand_path(path));
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(Error::config_not_found(path));
        }

        let search_paths = [
            PathBuf::from("signalhub.toml"),
            PathBuf::from("config.toml"),
            dirs::config_dir()
                .map(|p| p.join("signalhub").join("signalhub.toml"))
                .unwrap_or_default(),
            dirs::home_dir()
                .map(|p| p.join(".signalhub").join("signalhub.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/signalhub/signalhub.toml"),
        ];

        for path in &search_paths {
            if path.is_file() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path.clone()));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // Server settings
        if let Ok(val) = std::env::var("SIGNALHUB_BIND") {
            self.server.bind = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(val) = std::env::var("SIGNALHUB_PORT") {
            if let Ok(port) = val.parse::<u16>() {
                self.server.bind = vec![format!("0.0.0.0:{}", port)];
            }
        }
        if let Ok(val) = std::env::var("SIGNALHUB_COMPACTION") {
            self.server.compaction_enabled = parse_bool(&val);
        }
        if let Ok(val) = std::env::var("SIGNALHUB_STATS_TOKEN") {
            self.server.stats_token = Some(val);
        }

        // Directory settings
        if let Ok(val) = std::env::var("SIGNALHUB_REDIS_URL") {
            self.directory.backend = DirectoryBackend::Redis;
            self.directory.url = Some(val);
        }
        if let Ok(val) = std::env::var("SIGNALHUB_NODE_ADDRESS") {
            self.directory.node_address = Some(val);
        }

        // Relay settings
        if let Ok(val) = std::env::var("SIGNALHUB_BATCH_SIZE") {
            if let Ok(n) = val.parse() {
                self.relay.batch_size = n;
            }
        }
        if let Ok(val) = std::env::var("SIGNALHUB_FLUSH_INTERVAL_MS") {
            if let Ok(n) = val.parse() {
                self.relay.flush_interval_ms = n;
            }
        }

        // Logging settings
        if let Ok(val) = std::env::var("SIGNALHUB_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("SIGNALHUB_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Ok(val) = std::env::var("SIGNALHUB_LOG_JSON") {
            self.logging.json_format = parse_bool(&val);
        }
    }

    /// Expand ~ and other path variables
    fn expand_paths(&mut self) {
        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.bind.is_empty() {
            return Err(Error::config_field_invalid(
                "server.bind",
                "at least one listen address is required",
            ));
        }
        for bind in &self.server.bind {
            if bind.parse::<SocketAddr>().is_err() {
                return Err(Error::config_field_invalid(
                    "server.bind",
                    format!("'{}' is not a valid socket address", bind),
                ));
            }
        }

        if self.directory.backend == DirectoryBackend::Redis {
            let url = self.directory.url.as_deref().ok_or_else(|| {
                Error::config_field_invalid("directory.url", "redis backend requires a url")
            })?;
            let parsed = url::Url::parse(url).map_err(|e| {
                Error::config_field_invalid("directory.url", format!("invalid url: {}", e))
            })?;
            if parsed.scheme() != "redis" && parsed.scheme() != "rediss" {
                return Err(Error::config_field_invalid(
                    "directory.url",
                    "url must start with redis:// or rediss://",
                ));
            }
        }

        if let Some(ref addr) = self.directory.node_address {
            if addr.is_empty() || addr.contains(':') {
                return Err(Error::config_field_invalid(
                    "directory.node_address",
                    "node address must be non-empty and must not contain ':'",
                ));
            }
        }

        let relay = &self.relay;
        let positive = [
            ("server.socket_send_buffer", self.server.socket_send_buffer as u64),
            ("server.websocket_max_message_bytes", self.server.websocket_max_message_bytes as u64),
            ("directory.peer_ttl_secs", self.directory.peer_ttl_secs),
            ("directory.stats_ttl_secs", self.directory.stats_ttl_secs),
            ("relay.batch_size", relay.batch_size as u64),
            ("relay.flush_interval_ms", relay.flush_interval_ms),
            ("relay.heartbeat_interval_ms", relay.heartbeat_interval_ms),
            ("relay.drain_block_secs", relay.drain_block_secs),
            ("relay.polling_hold_secs", relay.polling_hold_secs),
            ("relay.polling_queue_size", relay.polling_queue_size as u64),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(Error::config_field_invalid(
                    field,
                    format!("{} must be greater than zero", field),
                ));
            }
        }
        if relay.queue_low_water >= relay.queue_high_water {
            return Err(Error::config_field_invalid(
                "relay.queue_low_water",
                "queue_low_water must be below queue_high_water",
            ));
        }
        if relay.queue_resume_len > relay.queue_low_water {
            return Err(Error::config_field_invalid(
                "relay.queue_resume_len",
                "queue_resume_len must not exceed queue_low_water",
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::config_field_invalid(
                "logging.level",
                format!(
                    "Invalid log level '{}'. Must be one of: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            ));
        }

        Ok(())
    }
}

fn parse_bool(val: &str) -> bool {
    val.eq_ignore_ascii_case("true") || val == "1"
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or(std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Initialize a new configuration file
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".signalhub")
                .join("signalhub.toml")
        });

    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    fs::write(&config_path, generate_default_config()).map_err(|e| Error::IoWrite {
        path: config_path.clone(),
        source: e,
    })?;

    Ok(config_path)
}

/// Generate default configuration content with comments
fn generate_default_config() -> String {
    r#"# SignalHub Configuration

[server]
# Addresses to listen on (HTTP long-poll and WebSocket share the port)
bind = ["0.0.0.0:8080"]

# Honour the client's compaction flag (c=1)
compaction_enabled = true

# Expose /info, /count, /total_count and /version
stats_enabled = true

# Require ?token=<value> on the stats endpoints
# stats_token = "secret"

websocket_max_message_bytes = 131072
socket_send_buffer = 256

[directory]
# "memory" for a single process, "redis" to bridge processes and machines
backend = "memory"
# url = "redis://127.0.0.1:6379/0"

# Address of this process in the directory (default: <hostname>-<pid>)
# node_address = "relay-a"

peer_ttl_secs = 600
stats_ttl_secs = 20
breaker_window_ms = 2000
cache_capacity = 80000

[relay]
batch_size = 800
flush_interval_ms = 60
backoff_reset_secs = 90
queue_high_water = 300
queue_low_water = 100
queue_resume_len = 50
heartbeat_interval_ms = 7000
heartbeat_max_retries = 2
drain_block_secs = 7
sweep_interval_secs = 360
publish_count_interval_ms = 7000
polling_linger_ms = 200
polling_hold_secs = 97
polling_queue_size = 30

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (comment out to disable file logging)
# file = "~/.signalhub/logs/signalhub.log"

# Number of rotated log files to keep
max_files = 5

# Enable JSON formatted logging
json_format = false
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.server.bind, vec!["0.0.0.0:8080"]);
        assert_eq!(config.directory.backend, DirectoryBackend::Memory);
        assert_eq!(config.relay.batch_size, 800);
        assert_eq!(config.relay.queue_high_water, 300);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_generated_config_parses_to_defaults() {
        let parsed: RelayConfig = toml::from_str(&generate_default_config()).unwrap();
        let defaults = RelayConfig::default();
        assert_eq!(parsed.server.bind, defaults.server.bind);
        assert_eq!(parsed.relay.flush_interval_ms, defaults.relay.flush_interval_ms);
        assert_eq!(parsed.directory.cache_capacity, defaults.directory.cache_capacity);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_env_override() {
        env::set_var("SIGNALHUB_BIND", "127.0.0.1:9000, 127.0.0.1:9001");
        env::set_var("SIGNALHUB_LOG_LEVEL", "debug");
        env::set_var("SIGNALHUB_NODE_ADDRESS", "relay-test");

        let mut config = RelayConfig::default();
        config.apply_env_overrides();

        assert_eq!(config.server.bind, vec!["127.0.0.1:9000", "127.0.0.1:9001"]);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.directory.resolved_node_address(), "relay-test");

        env::remove_var("SIGNALHUB_BIND");
        env::remove_var("SIGNALHUB_LOG_LEVEL");
        env::remove_var("SIGNALHUB_NODE_ADDRESS");
    }

    #[test]
    fn test_validation_invalid_bind() {
        let mut config = RelayConfig::default();
        config.server.bind = vec!["not-an-address".to_string()];
        assert!(config.validate().is_err());

        config.server.bind.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_redis_requires_url() {
        let mut config = RelayConfig::default();
        config.directory.backend = DirectoryBackend::Redis;
        assert!(config.validate().is_err());

        config.directory.url = Some("http://localhost:6379".to_string());
        assert!(config.validate().is_err());

        config.directory.url = Some("redis://localhost:6379/0".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_node_address_separator() {
        let mut config = RelayConfig::default();
        config.directory.node_address = Some("10.0.0.1:4000".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_queue_marks() {
        let mut config = RelayConfig::default();
        config.relay.queue_low_water = 300;
        assert!(config.validate().is_err());

        let mut config = RelayConfig::default();
        config.relay.queue_resume_len = 150;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_sizes() {
        let cases: [(&str, fn(&mut RelayConfig)); 6] = [
            ("server.socket_send_buffer", |c| c.server.socket_send_buffer = 0),
            ("directory.stats_ttl_secs", |c| c.directory.stats_ttl_secs = 0),
            ("relay.heartbeat_interval_ms", |c| c.relay.heartbeat_interval_ms = 0),
            ("relay.drain_block_secs", |c| c.relay.drain_block_secs = 0),
            ("relay.polling_queue_size", |c| c.relay.polling_queue_size = 0),
            ("relay.batch_size", |c| c.relay.batch_size = 0),
        ];

        for (expected, zero) in cases {
            let mut config = RelayConfig::default();
            zero(&mut config);
            match config.validate() {
                Err(Error::ConfigValidation { field, .. }) => {
                    assert_eq!(field.as_deref(), Some(expected))
                }
                other => panic!("{} = 0 accepted: {:?}", expected, other),
            }
        }
    }

    #[test]
    fn test_validation_invalid_log_level() {
        let mut config = RelayConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_node_address_has_no_separator() {
        let addr = default_node_address();
        assert!(!addr.contains(':'));
        assert!(addr.ends_with(&std::process::id().to_string()));
    }

    #[test]
    fn test_parse_config_file() {
        let config_str = r#"
[server]
bind = ["127.0.0.1:7000"]
compaction_enabled = false

[directory]
backend = "redis"
url = "redis://cache:6379/2"
node_address = "relay-b"

[relay]
batch_size = 100
queue_high_water = 500

[logging]
level = "warn"
"#;

        let config: RelayConfig = toml::from_str(config_str).unwrap();

        assert_eq!(config.server.bind, vec!["127.0.0.1:7000"]);
        assert!(!config.server.compaction_enabled);
        assert_eq!(config.directory.backend, DirectoryBackend::Redis);
        assert_eq!(config.directory.url.as_deref(), Some("redis://cache:6379/2"));
        assert_eq!(config.relay.batch_size, 100);
        assert_eq!(config.relay.queue_high_water, 500);
        assert_eq!(config.relay.flush_interval_ms, 60);
        assert_eq!(config.logging.level, "warn");
        assert!(config.validate().is_ok());
    }
}
