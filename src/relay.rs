//! One relay process: directory client, remote nodes, hub and the
//! background tasks that keep them running

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::{DirectoryBackend, DirectorySettings, RelayConfig};
use crate::directory::{Directory, DirectoryStore, MemoryStore};
use crate::error::{Error, Result};
use crate::node::Nodes;
use crate::peer::Hub;
use crate::server::AppState;
use crate::timer::{jittered, TimerGuard};

/// Spread of the sweep period across processes
const SWEEP_JITTER: Duration = Duration::from_secs(10);

/// Spread of the client-count publish period
const PUBLISH_JITTER: Duration = Duration::from_millis(500);

/// Open the store selected by `[directory] backend`
pub async fn open_store(settings: &DirectorySettings) -> Result<Arc<dyn DirectoryStore>> {
    match settings.backend {
        DirectoryBackend::Memory => {
            info!("Using in-process directory store");
            Ok(Arc::new(MemoryStore::new()))
        }
        #[cfg(feature = "redis-store")]
        DirectoryBackend::Redis => {
            let url = settings
                .url
                .as_deref()
                .ok_or_else(|| Error::config_field_invalid("directory.url", "required for the redis backend"))?;
            Ok(Arc::new(crate::directory::RedisStore::connect(url).await?))
        }
        #[cfg(not(feature = "redis-store"))]
        DirectoryBackend::Redis => Err(Error::config_field_invalid(
            "directory.backend",
            "this build does not include the redis-store feature",
        )),
    }
}

/// A running relay process
pub struct Relay {
    config: RelayConfig,
    hub: Arc<Hub>,
    started_at: DateTime<Utc>,
    tasks: Mutex<Vec<TimerGuard>>,
}

impl Relay {
    /// Wire up the relay over `store` and start its background tasks.
    /// Must be called inside a tokio runtime.
    pub fn start(config: RelayConfig, store: Arc<dyn DirectoryStore>) -> Arc<Self> {
        let address = config.directory.resolved_node_address();
        let directory = Arc::new(Directory::new(store, address.clone(), &config.directory));
        let nodes = Nodes::new(directory.clone(), config.relay.clone());
        let hub = Hub::new(directory.clone(), nodes);

        let settings = &config.relay;
        let drain = TimerGuard::spawn(hub.clone().consume(settings.drain_block()));
        let sweep = TimerGuard::spawn(sweep_loop(
            hub.clone(),
            Duration::from_secs(settings.sweep_interval_secs),
        ));
        let publish = TimerGuard::spawn(publish_loop(
            hub.clone(),
            Duration::from_millis(settings.publish_count_interval_ms),
        ));

        info!(
            address = %address,
            batch_size = settings.batch_size,
            flush_interval_ms = settings.flush_interval_ms,
            "Relay started"
        );

        Arc::new(Self {
            config,
            hub,
            started_at: Utc::now(),
            tasks: Mutex::new(vec![drain, sweep, publish]),
        })
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Handler state for the HTTP server
    pub fn app_state(&self) -> AppState {
        AppState::new(self.hub.clone(), &self.config, self.started_at)
    }

    /// Stop background work, close every client and flush every remote
    /// node's pending batches
    pub async fn shutdown(&self) {
        let tasks: Vec<TimerGuard> = std::mem::take(&mut *self.tasks.lock());
        drop(tasks);

        let clients = self.hub.client_count();
        self.hub.close_all().await;
        self.hub.nodes().shutdown().await;
        info!(clients, "Relay stopped");
    }
}

async fn sweep_loop(hub: Arc<Hub>, period: Duration) {
    loop {
        tokio::time::sleep(jittered(period, SWEEP_JITTER)).await;
        hub.check_conns(Instant::now()).await;
    }
}

async fn publish_loop(hub: Arc<Hub>, period: Duration) {
    loop {
        let count = hub.client_count();
        hub.directory().publish_client_count(count).await;
        debug!(clients = count, "Published client count");
        tokio::time::sleep(jittered(period, PUBLISH_JITTER)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::{Client, ClientOptions};

    fn config(address: &str) -> RelayConfig {
        let mut config = RelayConfig::default();
        config.directory.node_address = Some(address.to_string());
        config
    }

    #[tokio::test]
    async fn test_open_memory_store() {
        assert!(open_store(&DirectorySettings::default()).await.is_ok());
    }

    #[cfg(not(feature = "redis-store"))]
    #[tokio::test]
    async fn test_redis_backend_needs_feature() {
        let settings = DirectorySettings {
            backend: DirectoryBackend::Redis,
            url: Some("redis://127.0.0.1:6379".into()),
            ..Default::default()
        };
        assert!(open_store(&settings).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_publishes_client_count() {
        let store = Arc::new(MemoryStore::new());
        let relay = Relay::start(config("relay-a"), store.clone());
        assert_eq!(relay.config().directory.resolved_node_address(), "relay-a");
        let observer = Directory::new(store, "relay-b".into(), &DirectorySettings::default());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(observer.node_client_count("relay-a").await.unwrap(), Some(0));

        relay.hub().register(Client::polling("peer-aaaaaa", ClientOptions::default())).await;
        tokio::time::sleep(Duration::from_secs(8)).await;
        assert_eq!(observer.node_client_count("relay-a").await.unwrap(), Some(1));

        relay.shutdown().await;
        assert_eq!(relay.hub().client_count(), 0);
    }
}
