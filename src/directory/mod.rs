//! Shared peer directory
//!
//! Maps peer ids to the address of the relay process holding them, keeps a
//! per-process live-client counter that doubles as a liveness signal, and
//! owns each process's inbound queue of encoded batches. Lookups go through
//! a bounded LRU cache. Every store failure trips a short circuit breaker;
//! while it is open, writes are skipped and reads fail fast.
//!
//! Keys:
//! - `peer:<peer_id>` → `<address>` or `<address>:1` (peer accepts compaction)
//! - `stats:<address>` → live client count
//! - `queue:<address>` → list of encoded batches

mod breaker;
#[cfg(feature = "redis-store")]
mod redis_store;
mod store;

pub use breaker::Breaker;
#[cfg(feature = "redis-store")]
pub use redis_store::RedisStore;
pub use store::{DirectoryStore, MemoryStore};

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::config::DirectorySettings;
use crate::error::{Error, Result};

fn peer_key(peer_id: &str) -> String {
    format!("peer:{}", peer_id)
}

fn stats_key(address: &str) -> String {
    format!("stats:{}", address)
}

fn queue_key(address: &str) -> String {
    format!("queue:{}", address)
}

/// Where a remote peer was last registered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerLocation {
    /// Address of the relay process holding the peer
    pub address: String,
    /// The peer accepts compacted payloads
    pub compact: bool,
}

impl PeerLocation {
    fn parse(value: &str) -> Self {
        let mut parts = value.splitn(2, ':');
        let address = parts.next().unwrap_or_default().to_string();
        let compact = parts.next().is_some_and(|extra| !extra.is_empty());
        Self { address, compact }
    }
}

/// Lookup cache counters since the last reset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub lookups: u64,
    pub hits: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.lookups == 0 {
            0.0
        } else {
            self.hits as f64 * 100.0 / self.lookups as f64
        }
    }
}

/// Directory client owned by one relay process
pub struct Directory {
    store: Arc<dyn DirectoryStore>,
    self_address: String,
    peer_ttl: Duration,
    stats_ttl: Duration,
    breaker: Breaker,
    cache: Mutex<LruCache<String, String>>,
    lookups: AtomicU64,
    hits: AtomicU64,
}

impl Directory {
    pub fn new(store: Arc<dyn DirectoryStore>, self_address: String, settings: &DirectorySettings) -> Self {
        let capacity = NonZeroUsize::new(settings.cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            self_address,
            peer_ttl: Duration::from_secs(settings.peer_ttl_secs),
            stats_ttl: Duration::from_secs(settings.stats_ttl_secs),
            breaker: Breaker::new(settings.breaker_window()),
            cache: Mutex::new(LruCache::new(capacity)),
            lookups: AtomicU64::new(0),
            hits: AtomicU64::new(0),
        }
    }

    /// This process's address
    pub fn self_address(&self) -> &str {
        &self.self_address
    }

    /// False while the breaker is open
    pub fn is_healthy(&self) -> bool {
        self.breaker.is_healthy()
    }

    /// Trip the breaker on failure and pass the result through
    fn observe<T>(&self, op: &'static str, result: Result<T>) -> Result<T> {
        if let Err(ref e) = result {
            self.breaker.trip(op, e);
        }
        result
    }

    fn ensure_healthy(&self) -> Result<()> {
        if self.is_healthy() {
            Ok(())
        } else {
            Err(Error::StoreUnavailable)
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // Local peer presence (best effort, skipped while unhealthy)
    // ─────────────────────────────────────────────────────────────────

    /// Publish that `peer_id` is reachable through this process
    pub async fn set_local_peer(&self, peer_id: &str, compact: bool) {
        if !self.is_healthy() {
            return;
        }
        let value = if compact {
            format!("{}:1", self.self_address)
        } else {
            self.self_address.clone()
        };
        let result = self.store.set_ex(&peer_key(peer_id), &value, self.peer_ttl).await;
        let _ = self.observe("set_local_peer", result);
    }

    pub async fn del_local_peer(&self, peer_id: &str) {
        if !self.is_healthy() {
            return;
        }
        let result = self.store.del(&peer_key(peer_id)).await;
        let _ = self.observe("del_local_peer", result);
    }

    /// Extend the presence TTL of a local peer
    pub async fn refresh_local_peer(&self, peer_id: &str) {
        if !self.is_healthy() {
            return;
        }
        let result = self.store.expire(&peer_key(peer_id), self.peer_ttl).await;
        let _ = self.observe("refresh_local_peer", result);
    }

    /// Publish this process's live client count
    pub async fn publish_client_count(&self, count: usize) {
        if !self.is_healthy() {
            return;
        }
        let result = self
            .store
            .set_ex(&stats_key(&self.self_address), &count.to_string(), self.stats_ttl)
            .await;
        let _ = self.observe("publish_client_count", result);
    }

    // ─────────────────────────────────────────────────────────────────
    // Lookups
    // ─────────────────────────────────────────────────────────────────

    /// Live client count published by `address`; `None` if it has not
    /// published within the stats TTL
    pub async fn node_client_count(&self, address: &str) -> Result<Option<u64>> {
        self.ensure_healthy()?;
        let result = self.store.get(&stats_key(address)).await;
        let value = self.observe("node_client_count", result)?;
        Ok(value.and_then(|v| v.parse().ok()))
    }

    /// Last known location of a peer registered on another process
    ///
    /// Entries pointing at this process resolve to `None`.
    pub async fn resolve_peer(&self, peer_id: &str) -> Result<Option<PeerLocation>> {
        self.lookups.fetch_add(1, Ordering::Relaxed);

        let cached = self.cache.lock().get(peer_id).cloned();
        let value = match cached {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                self.ensure_healthy()?;
                let result = self.store.get(&peer_key(peer_id)).await;
                let value = self.observe("resolve_peer", result)?;
                if let Some(ref v) = value {
                    self.cache.lock().put(peer_id.to_string(), v.clone());
                }
                value
            }
        };

        let location = value.map(|v| PeerLocation::parse(&v));
        trace!(peer = %peer_id, location = ?location, "Resolved peer");
        Ok(location.filter(|l| l.address != self.self_address))
    }

    /// Drop a cached location that turned out to be stale
    pub fn forget_peer(&self, peer_id: &str) {
        self.cache.lock().pop(peer_id);
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            lookups: self.lookups.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
        }
    }

    pub fn reset_cache_stats(&self) {
        self.lookups.store(0, Ordering::Relaxed);
        self.hits.store(0, Ordering::Relaxed);
    }

    // ─────────────────────────────────────────────────────────────────
    // Process queues
    // ─────────────────────────────────────────────────────────────────

    /// Append an encoded batch to `address`'s queue, returning its length
    pub async fn push_batch(&self, address: &str, batch: Vec<u8>) -> Result<u64> {
        let result = self.store.rpush(&queue_key(address), batch).await;
        self.observe("push_batch", result)
    }

    pub async fn queue_len(&self, address: &str) -> Result<u64> {
        let result = self.store.llen(&queue_key(address)).await;
        self.observe("queue_len", result)
    }

    /// Keep only the newest `keep` batches of `address`'s queue
    pub async fn trim_queue(&self, address: &str, keep: u64) -> Result<()> {
        let keep = keep.max(1) as i64;
        let result = self.store.ltrim(&queue_key(address), -keep, -1).await;
        self.observe("trim_queue", result)
    }

    /// Discard everything queued for `address`
    pub async fn clear_queue(&self, address: &str) -> Result<()> {
        debug!(address = %address, "Clearing process queue");
        let result = self.store.ltrim(&queue_key(address), 1, 0).await;
        self.observe("clear_queue", result)
    }

    /// Wait up to `timeout` for the next batch addressed to this process
    pub async fn pop_inbound(&self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let result = self.store.blpop(&queue_key(&self.self_address), timeout).await;
        self.observe("pop_inbound", result)
    }
}
