//! Remote relay processes
//!
//! A [`Node`] is this process's handle to another relay process: signals
//! for peers held there are batched by an [`Aggregator`] and pushed onto
//! that process's directory queue. Each node runs a heartbeat that reads the
//! process's published client count; a node that misses too many beats is
//! declared dead, its queue cleared and its handle dropped.

mod writer;

pub use writer::{QueueWriter, Watermarks};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::aggregator::Aggregator;
use crate::config::RelaySettings;
use crate::directory::Directory;
use crate::protocol::SignalItem;
use crate::timer::TimerGuard;

// ─────────────────────────────────────────────────────────────────
// Node
// ─────────────────────────────────────────────────────────────────

/// Handle to one remote relay process
pub struct Node {
    address: String,
    alive: Arc<AtomicBool>,
    failed_beats: AtomicU32,
    client_count: AtomicU64,
    aggregator: Aggregator<SignalItem>,
    heartbeat: Mutex<Option<TimerGuard>>,
}

impl Node {
    fn new(address: &str, client_count: u64, directory: Arc<Directory>, settings: &RelaySettings) -> Self {
        let alive = Arc::new(AtomicBool::new(true));
        let marks = Watermarks {
            high: settings.queue_high_water,
            low: settings.queue_low_water,
            resume: settings.queue_resume_len,
        };
        let writer = QueueWriter::new(address.to_string(), directory, alive.clone(), marks);
        let aggregator = Aggregator::start(
            settings.flush_interval(),
            settings.batch_size,
            std::time::Duration::from_secs(settings.backoff_reset_secs),
            writer,
        );

        Self {
            address: address.to_string(),
            alive,
            failed_beats: AtomicU32::new(0),
            client_count: AtomicU64::new(client_count),
            aggregator,
            heartbeat: Mutex::new(None),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    /// Client count last published by the process
    pub fn client_count(&self) -> u64 {
        self.client_count.load(Ordering::Relaxed)
    }

    /// Items waiting for the next flush
    pub fn pending(&self) -> usize {
        self.aggregator.pending()
    }

    /// Accept a serialized message for `to_peer_id` for asynchronous relay.
    /// Only refuses when the node is dead; acceptance is not delivery.
    pub fn send_signal(&self, to_peer_id: &str, payload: String) -> bool {
        if !self.is_alive() {
            return false;
        }
        self.aggregator.enqueue(SignalItem::new(to_peer_id, payload.into_bytes()));
        true
    }

    /// Record one heartbeat result; returns true once retries are exhausted
    fn record_beat(&self, count: Option<u64>, max_retries: u32) -> bool {
        match count {
            Some(count) => {
                self.failed_beats.store(0, Ordering::Relaxed);
                self.client_count.store(count, Ordering::Relaxed);
                false
            }
            None => self.failed_beats.fetch_add(1, Ordering::Relaxed) + 1 > max_retries,
        }
    }

    /// Detach the heartbeat guard; dropping it cancels the heartbeat
    fn take_heartbeat(&self) -> Option<TimerGuard> {
        self.heartbeat.lock().take()
    }

    async fn stop(&self) {
        self.take_heartbeat();
        self.aggregator.stop().await;
    }
}

// ─────────────────────────────────────────────────────────────────
// Nodes
// ─────────────────────────────────────────────────────────────────

/// All remote nodes this process currently talks to
pub struct Nodes {
    directory: Arc<Directory>,
    settings: RelaySettings,
    nodes: RwLock<HashMap<String, Arc<Node>>>,
}

impl Nodes {
    pub fn new(directory: Arc<Directory>, settings: RelaySettings) -> Arc<Self> {
        Arc::new(Self {
            directory,
            settings,
            nodes: RwLock::new(HashMap::new()),
        })
    }

    pub fn get(&self, address: &str) -> Option<Arc<Node>> {
        self.nodes.read().get(address).cloned()
    }

    /// Existing handle for `address`, or a new one if the process is
    /// confirmed live. `None` when it cannot be confirmed.
    pub async fn get_or_create(self: &Arc<Self>, address: &str) -> Option<Arc<Node>> {
        if let Some(node) = self.get(address) {
            return node.is_alive().then_some(node);
        }

        let count = match self.directory.node_client_count(address).await {
            Ok(Some(count)) => count,
            Ok(None) => {
                debug!(node = %address, "Node has not published a client count");
                return None;
            }
            Err(e) => {
                debug!(node = %address, error = %e, "Node liveness check failed");
                return None;
            }
        };

        let node = {
            let mut nodes = self.nodes.write();
            if let Some(existing) = nodes.get(address) {
                return existing.is_alive().then(|| existing.clone());
            }
            let node = Arc::new(Node::new(address, count, self.directory.clone(), &self.settings));
            nodes.insert(address.to_string(), node.clone());
            node
        };

        let heartbeat = TimerGuard::spawn(heartbeat_loop(
            Arc::downgrade(self),
            Arc::downgrade(&node),
            self.settings.clone(),
        ));
        *node.heartbeat.lock() = Some(heartbeat);

        info!(node = %address, clients = count, "Remote node added");
        Some(node)
    }

    /// Number of nodes believed alive
    pub fn alive_count(&self) -> usize {
        self.nodes.read().values().filter(|n| n.is_alive()).count()
    }

    /// Sum of the client counts last published by live nodes
    pub fn total_client_count(&self) -> u64 {
        self.nodes
            .read()
            .values()
            .filter(|n| n.is_alive())
            .map(|n| n.client_count())
            .sum()
    }

    /// Declare `node` dead: clear its queue, drop its handle and discard
    /// whatever it still holds
    async fn retire(&self, node: &Arc<Node>) {
        if !node.alive.swap(false, Ordering::Relaxed) {
            return;
        }
        if let Some(heartbeat) = node.take_heartbeat() {
            heartbeat.disarm();
        }

        warn!(node = %node.address, "Remote node unreachable, removing");
        if let Err(e) = self.directory.clear_queue(&node.address).await {
            debug!(node = %node.address, error = %e, "Failed to clear queue of dead node");
        }
        node.aggregator.stop().await;

        let mut nodes = self.nodes.write();
        if nodes.get(&node.address).is_some_and(|n| Arc::ptr_eq(n, node)) {
            nodes.remove(&node.address);
        }
    }

    /// Flush every node's pending batches and forget all nodes
    pub async fn shutdown(&self) {
        let nodes: Vec<Arc<Node>> = self.nodes.write().drain().map(|(_, n)| n).collect();
        for node in &nodes {
            node.stop().await;
        }
        if !nodes.is_empty() {
            info!(count = nodes.len(), "Remote nodes flushed");
        }
    }
}

async fn heartbeat_loop(nodes: Weak<Nodes>, node: Weak<Node>, settings: RelaySettings) {
    let mut ticker = tokio::time::interval(settings.heartbeat_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let (Some(nodes), Some(node)) = (nodes.upgrade(), node.upgrade()) else {
            return;
        };

        let count = match nodes.directory.node_client_count(&node.address).await {
            Ok(count) => count,
            Err(e) => {
                debug!(node = %node.address, error = %e, "Heartbeat failed");
                None
            }
        };

        if node.record_beat(count, settings.heartbeat_max_retries) {
            nodes.retire(&node).await;
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DirectorySettings;
    use crate::directory::MemoryStore;
    use crate::protocol::SignalBatch;
    use std::time::Duration;

    fn setup(settings: RelaySettings) -> (Arc<MemoryStore>, Arc<Directory>, Arc<Nodes>) {
        let store = Arc::new(MemoryStore::new());
        let directory = Arc::new(Directory::new(
            store.clone(),
            "relay-a".into(),
            &DirectorySettings::default(),
        ));
        let nodes = Nodes::new(directory.clone(), settings);
        (store, directory, nodes)
    }

    async fn publish(store: &MemoryStore, address: &str, count: u64) {
        use crate::directory::DirectoryStore;
        store
            .set_ex(&format!("stats:{}", address), &count.to_string(), Duration::from_secs(20))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unconfirmed_node_is_not_created() {
        let (_store, _dir, nodes) = setup(RelaySettings::default());
        assert!(nodes.get_or_create("relay-b").await.is_none());
        assert_eq!(nodes.alive_count(), 0);
    }

    #[tokio::test]
    async fn test_live_node_created_once() {
        let (store, _dir, nodes) = setup(RelaySettings::default());
        publish(&store, "relay-b", 4).await;

        let first = nodes.get_or_create("relay-b").await.unwrap();
        let second = nodes.get_or_create("relay-b").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(nodes.total_client_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_signal_reaches_queue() {
        let (store, directory, nodes) = setup(RelaySettings::default());
        publish(&store, "relay-b", 1).await;
        let node = nodes.get_or_create("relay-b").await.unwrap();

        assert!(node.send_signal("peer-bbbbbb", r#"{"action":"signal"}"#.into()));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(directory.queue_len("relay-b").await.unwrap(), 1);
        use crate::directory::DirectoryStore;
        let blob = store.blpop("queue:relay-b", Duration::ZERO).await.unwrap().unwrap();
        let batch = SignalBatch::from_bytes(&blob).unwrap();
        assert_eq!(batch.items[0].to_peer_id, "peer-bbbbbb");
    }

    #[tokio::test(start_paused = true)]
    async fn test_missed_heartbeats_retire_node() {
        let settings = RelaySettings::default();
        let (store, directory, nodes) = setup(settings.clone());
        publish(&store, "relay-b", 1).await;
        let node = nodes.get_or_create("relay-b").await.unwrap();

        directory.push_batch("relay-b", vec![1, 2, 3]).await.unwrap();

        // stats key expires after 20s; three missed beats exceed two retries
        tokio::time::sleep(Duration::from_secs(20 + 7 * 4)).await;

        assert!(!node.is_alive());
        assert!(!node.send_signal("peer-bbbbbb", "{}".into()));
        assert!(nodes.get("relay-b").is_none());
        assert_eq!(directory.queue_len("relay-b").await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_congestion_sheds_batches() {
        let settings = RelaySettings {
            batch_size: 1,
            queue_high_water: 3,
            queue_low_water: 2,
            queue_resume_len: 1,
            ..Default::default()
        };
        let (store, directory, nodes) = setup(settings);
        publish(&store, "relay-b", 1).await;
        let node = nodes.get_or_create("relay-b").await.unwrap();

        for _ in 0..3 {
            node.send_signal("peer-bbbbbb", "{}".into());
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // third push hit high water and trimmed to two
        assert_eq!(directory.queue_len("relay-b").await.unwrap(), 2);

        // the consumer falls behind: shed while at or above high water
        directory.push_batch("relay-b", vec![0]).await.unwrap();
        directory.push_batch("relay-b", vec![0]).await.unwrap();
        node.send_signal("peer-bbbbbb", "{}".into());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(directory.queue_len("relay-b").await.unwrap(), 4);

        // drained to the resume length: pushes resume
        directory.trim_queue("relay-b", 1).await.unwrap();
        node.send_signal("peer-bbbbbb", "{}".into());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(directory.queue_len("relay-b").await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_pending() {
        let (store, directory, nodes) = setup(RelaySettings::default());
        publish(&store, "relay-b", 1).await;
        let node = nodes.get_or_create("relay-b").await.unwrap();

        node.send_signal("peer-bbbbbb", "{}".into());
        assert_eq!(node.pending(), 1);
        nodes.shutdown().await;

        assert_eq!(directory.queue_len("relay-b").await.unwrap(), 1);
        assert_eq!(nodes.alive_count(), 0);
    }
}
