//! Local peer registry and message router
//!
//! The hub owns every client connected to this process. Messages for a
//! local peer are delivered directly; anything else is resolved through the
//! directory and handed to the remote node holding the peer. The hub also
//! drains this process's inbound queue and sweeps idle clients.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use super::client::{Client, TransportMode};
use crate::directory::Directory;
use crate::node::{Node, Nodes};
use crate::protocol::{merge_signals, not_found_message, Action, ClientMessage, SignalBatch, SignalItem};

/// Routing counters since the last sweep
#[derive(Debug, Default)]
struct RouteStats {
    signals: AtomicU64,
    not_found: AtomicU64,
}

impl RouteStats {
    fn not_found_rate(&self) -> f64 {
        let signals = self.signals.load(Ordering::Relaxed);
        if signals == 0 {
            0.0
        } else {
            self.not_found.load(Ordering::Relaxed) as f64 * 100.0 / signals as f64
        }
    }

    fn reset(&self) {
        self.signals.store(0, Ordering::Relaxed);
        self.not_found.store(0, Ordering::Relaxed);
    }
}

/// Client counts seen by one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub socket: usize,
    pub polling: usize,
    pub expired: usize,
}

/// Registry of the peers connected to this process
pub struct Hub {
    clients: RwLock<HashMap<String, Arc<Client>>>,
    directory: Arc<Directory>,
    nodes: Arc<Nodes>,
    stats: RouteStats,
}

impl Hub {
    pub fn new(directory: Arc<Directory>, nodes: Arc<Nodes>) -> Arc<Self> {
        Arc::new(Self {
            clients: RwLock::new(HashMap::new()),
            directory,
            nodes,
            stats: RouteStats::default(),
        })
    }

    pub fn directory(&self) -> &Arc<Directory> {
        &self.directory
    }

    pub fn nodes(&self) -> &Arc<Nodes> {
        &self.nodes
    }

    pub fn client(&self, peer_id: &str) -> Option<Arc<Client>> {
        self.clients.read().get(peer_id).cloned()
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    /// Signals routed and not-found replies sent since the last sweep
    pub fn route_counts(&self) -> (u64, u64) {
        (
            self.stats.signals.load(Ordering::Relaxed),
            self.stats.not_found.load(Ordering::Relaxed),
        )
    }

    // ─────────────────────────────────────────────────────────────
    // Registration
    // ─────────────────────────────────────────────────────────────

    /// Add a client and publish its presence. A different client already
    /// registered under the same id is closed and replaced.
    pub async fn register(&self, client: Arc<Client>) {
        let peer_id = client.peer_id().to_string();
        let replaced = self.clients.write().insert(peer_id.clone(), client.clone());
        if let Some(old) = replaced.filter(|old| !Arc::ptr_eq(old, &client)) {
            old.close();
        }

        debug!(
            peer = %peer_id,
            mode = client.mode().as_str(),
            device = client.device().unwrap_or("-"),
            "Client registered"
        );
        self.directory.set_local_peer(&peer_id, client.compact()).await;
    }

    /// Remove and close a client; false if it was not registered
    pub async fn unregister(&self, peer_id: &str) -> bool {
        let Some(client) = self.clients.write().remove(peer_id) else {
            return false;
        };
        self.finish_unregister(client).await;
        true
    }

    /// Like [`Hub::unregister`], but only if `client` is still the one
    /// registered under its id
    pub async fn unregister_client(&self, client: &Arc<Client>) -> bool {
        let removed = {
            let mut clients = self.clients.write();
            match clients.get(client.peer_id()) {
                Some(current) if Arc::ptr_eq(current, client) => clients.remove(client.peer_id()),
                _ => None,
            }
        };
        match removed {
            Some(client) => {
                self.finish_unregister(client).await;
                true
            }
            None => false,
        }
    }

    async fn finish_unregister(&self, client: Arc<Client>) {
        client.close();
        debug!(peer = %client.peer_id(), "Client unregistered");
        self.directory.del_local_peer(client.peer_id()).await;
    }

    /// Activity from a client: stamp it and extend its directory record
    pub async fn touch(&self, client: &Client) {
        client.touch();
        self.directory.refresh_local_peer(client.peer_id()).await;
    }

    // ─────────────────────────────────────────────────────────────
    // Routing
    // ─────────────────────────────────────────────────────────────

    /// Dispatch one message from `sender_id`. `sender` is the sender's
    /// local client, absent when it is connected elsewhere.
    pub async fn route_message(&self, mut msg: ClientMessage, sender_id: &str, sender: Option<&Arc<Client>>) {
        let action = msg.action.clone();
        match action {
            Action::Touch => {
                if let Some(client) = sender {
                    self.touch(client).await;
                }
            }
            Action::Ping => {
                let Some(client) = sender else {
                    return;
                };
                self.touch(client).await;
                if !client.send(msg.into_pong().into_json()) {
                    self.unregister_client(client).await;
                }
            }
            Action::Unknown(action) => {
                warn!(peer = %sender_id, action = %action, "Unknown action dropped");
            }
            routed => {
                let Some(to) = msg.take_destination() else {
                    debug!(peer = %sender_id, "Message without destination dropped");
                    return;
                };
                msg.set_sender(sender_id);

                match routed {
                    Action::Signal => {
                        self.signal(msg, &to, sender_id, sender).await;
                    }
                    Action::Signals => self.signals(msg, &to, sender_id, sender).await,
                    _ => self.forward(msg, &to).await,
                }
            }
        }
    }

    /// Route one signal; false when it could not be handed on
    async fn signal(&self, mut msg: ClientMessage, to: &str, sender_id: &str, sender: Option<&Arc<Client>>) -> bool {
        if msg.data().is_none() || msg.has_empty_candidate() {
            trace!(peer = %sender_id, to = %to, "Signal without payload dropped");
            return false;
        }
        self.stats.signals.fetch_add(1, Ordering::Relaxed);

        if let Some(target) = self.client(to) {
            if target.compact() {
                msg.compact_for(sender_id);
            }
            if target.send(msg.into_json()) {
                return true;
            }
            self.unregister_client(&target).await;
            self.peer_not_found(to, sender_id, sender).await;
            return false;
        }

        if self.directory.is_healthy() {
            if let Some((node, compact)) = self.remote_node(to).await {
                if compact {
                    msg.compact_for(sender_id);
                }
                return node.send_signal(to, msg.into_json());
            }
        }

        self.peer_not_found(to, sender_id, sender).await;
        false
    }

    /// Route each item of a `signals` batch, stopping at the first failure
    async fn signals(&self, mut msg: ClientMessage, to: &str, sender_id: &str, sender: Option<&Arc<Client>>) {
        let Some(Value::Array(items)) = msg.take_data() else {
            debug!(peer = %sender_id, "Signals without a data array dropped");
            return;
        };

        for data in items {
            let item = ClientMessage::signal_item(sender_id, data);
            if !self.signal(item, to, sender_id, sender).await {
                break;
            }
        }
    }

    /// Pass a message on verbatim, with no not-found handling
    async fn forward(&self, msg: ClientMessage, to: &str) {
        if let Some(target) = self.client(to) {
            if !target.send(msg.into_json()) {
                self.unregister_client(&target).await;
            }
            return;
        }

        if self.directory.is_healthy() {
            if let Some((node, _)) = self.remote_node(to).await {
                node.send_signal(to, msg.into_json());
            }
        }
    }

    /// The node holding `peer_id` and whether the peer takes compacted
    /// payloads. Forgets the cached location if the node is gone.
    async fn remote_node(&self, peer_id: &str) -> Option<(Arc<Node>, bool)> {
        let location = match self.directory.resolve_peer(peer_id).await {
            Ok(Some(location)) => location,
            Ok(None) => return None,
            Err(e) => {
                debug!(peer = %peer_id, error = %e, "Peer lookup failed");
                return None;
            }
        };

        match self.nodes.get_or_create(&location.address).await {
            Some(node) => Some((node, location.compact)),
            None => {
                self.directory.forget_peer(peer_id);
                None
            }
        }
    }

    /// Tell `sender_id` that `missing` could not be reached
    async fn peer_not_found(&self, missing: &str, sender_id: &str, sender: Option<&Arc<Client>>) {
        let reply = not_found_message(missing).into_json();

        if let Some(client) = sender {
            if !client.remember_not_found(missing) {
                return;
            }
            self.stats.not_found.fetch_add(1, Ordering::Relaxed);
            if !client.send(reply) {
                self.unregister_client(client).await;
            }
            return;
        }

        // the sender lives on another process: relay the reply back to it
        if !self.directory.is_healthy() {
            return;
        }
        if let Some((node, _)) = self.remote_node(sender_id).await {
            if node.send_signal(sender_id, reply) {
                self.stats.not_found.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Inbound Queue
    // ─────────────────────────────────────────────────────────────

    /// Drain this process's inbound queue until the task is cancelled
    pub async fn consume(self: Arc<Self>, block: Duration) {
        info!(address = %self.directory.self_address(), "Draining inbound queue");

        loop {
            match self.directory.pop_inbound(block).await {
                Ok(Some(blob)) => match SignalBatch::from_bytes(&blob) {
                    Ok(batch) => self.deliver_batch(batch.items).await,
                    Err(e) => warn!(error = %e, bytes = blob.len(), "Dropping undecodable batch"),
                },
                Ok(None) => {}
                Err(e) => {
                    error!(error = %e, "Inbound queue pop failed");
                    tokio::time::sleep(block).await;
                }
            }
        }
    }

    /// Hand each item of an inbound batch to its local peer
    pub async fn deliver_batch(&self, items: Vec<SignalItem>) {
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<Vec<u8>>> = HashMap::new();
        for item in items {
            let payloads = groups.entry(item.to_peer_id.clone()).or_insert_with(|| {
                order.push(item.to_peer_id.clone());
                Vec::new()
            });
            payloads.push(item.data);
        }

        for peer_id in order {
            let Some(payloads) = groups.remove(&peer_id) else {
                continue;
            };
            let Some(client) = self.client(&peer_id) else {
                trace!(peer = %peer_id, items = payloads.len(), "Inbound items for unknown peer dropped");
                continue;
            };

            if !deliver_to(&client, &payloads) {
                self.unregister_client(&client).await;
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Maintenance
    // ─────────────────────────────────────────────────────────────

    /// Remove every client idle past its limit and log routing stats
    pub async fn check_conns(&self, now: Instant) -> SweepReport {
        let (expired, mut report) = {
            let clients = self.clients.read();
            let mut report = SweepReport::default();
            let mut expired = Vec::new();
            for client in clients.values() {
                if client.is_expired(now) {
                    expired.push(client.clone());
                    continue;
                }
                match client.mode() {
                    TransportMode::Socket => report.socket += 1,
                    TransportMode::Polling => report.polling += 1,
                }
            }
            (expired, report)
        };

        for client in &expired {
            if self.unregister_client(client).await {
                report.expired += 1;
            }
        }

        let cache = self.directory.cache_stats();
        info!(
            socket = report.socket,
            polling = report.polling,
            expired = report.expired,
            cache_hit_pct = format!("{:.1}", cache.hit_rate()),
            not_found_pct = format!("{:.1}", self.stats.not_found_rate()),
            "Client sweep"
        );

        self.stats.reset();
        self.directory.reset_cache_stats();
        report
    }

    /// Close and unregister every client
    pub async fn close_all(&self) {
        let clients: Vec<Arc<Client>> = self.clients.write().drain().map(|(_, c)| c).collect();
        for client in clients {
            self.finish_unregister(client).await;
        }
    }
}

/// Send queued payloads to one client, merged into a single message when
/// the client accepts batches
fn deliver_to(client: &Arc<Client>, payloads: &[Vec<u8>]) -> bool {
    if client.batchable() && payloads.len() > 1 {
        match merge_signals(payloads) {
            Ok(merged) => return client.send(merged),
            Err(e) => debug!(peer = %client.peer_id(), error = %e, "Cannot merge payloads, sending singly"),
        }
    }

    payloads
        .iter()
        .all(|payload| client.send(String::from_utf8_lossy(payload).into_owned()))
}
