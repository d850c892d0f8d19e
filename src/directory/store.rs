//! Key/value and list operations the directory needs from its backing store

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::{Error, Result};

/// The subset of Redis semantics the relay relies on
#[async_trait]
pub trait DirectoryStore: Send + Sync + 'static {
    /// `SET key value EX ttl`
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// `GET key`
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// `DEL key`
    async fn del(&self, key: &str) -> Result<()>;

    /// `EXPIRE key ttl`; false if the key does not exist
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// `RPUSH key value`, returning the new list length
    async fn rpush(&self, key: &str, value: Vec<u8>) -> Result<u64>;

    /// `LLEN key`
    async fn llen(&self, key: &str) -> Result<u64>;

    /// `LTRIM key start stop` with Redis index rules
    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()>;

    /// `BLPOP key timeout`; `None` when the wait elapses
    async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<Vec<u8>>>;
}

// ─────────────────────────────────────────────────────────────────
// In-memory store
// ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
enum Value {
    Str(String),
    List(VecDeque<Vec<u8>>),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Process-local store with lazy expiry
///
/// Serves single-process deployments, and lets several relays in one
/// process share a directory in tests. [`MemoryStore::set_unavailable`]
/// makes every operation fail, emulating an outage.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    pushed: Notify,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail (or stop failing) every subsequent operation
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self, op: &'static str) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::store(op, "store unavailable"));
        }
        Ok(())
    }

    /// Run `f` on the live entry for `key`, purging it first if expired
    fn with_live<R>(&self, key: &str, f: impl FnOnce(Option<&mut Entry>) -> R) -> R {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        if entries.get(key).is_some_and(|e| !e.is_live(now)) {
            entries.remove(key);
        }
        f(entries.get_mut(key))
    }

    fn pop_front(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        let Some(entry) = entries.get_mut(key) else {
            return Ok(None);
        };
        if !entry.is_live(now) {
            entries.remove(key);
            return Ok(None);
        }
        let (item, empty) = match entry.value {
            Value::List(ref mut list) => (list.pop_front(), list.is_empty()),
            Value::Str(_) => return Err(wrong_type("blpop")),
        };
        if empty {
            entries.remove(key);
        }
        Ok(item)
    }
}

fn wrong_type(op: &'static str) -> Error {
    Error::store(op, "WRONGTYPE operation against a key holding the wrong kind of value")
}

/// Resolve Redis-style inclusive `[start, stop]` indices against `len`
fn trim_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len {
        None
    } else {
        Some((start as usize, stop as usize))
    }
}

#[async_trait]
impl DirectoryStore for MemoryStore {
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.check("set")?;
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check("get")?;
        self.with_live(key, |entry| match entry.map(|e| &e.value) {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s.clone())),
            Some(Value::List(_)) => Err(wrong_type("get")),
        })
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.check("del")?;
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.check("expire")?;
        Ok(self.with_live(key, |entry| match entry {
            Some(e) => {
                e.expires_at = Some(Instant::now() + ttl);
                true
            }
            None => false,
        }))
    }

    async fn rpush(&self, key: &str, value: Vec<u8>) -> Result<u64> {
        self.check("rpush")?;
        let len = {
            let mut entries = self.entries.lock();
            let now = Instant::now();
            if entries.get(key).is_some_and(|e| !e.is_live(now)) {
                entries.remove(key);
            }
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::List(VecDeque::new()),
                expires_at: None,
            });
            match entry.value {
                Value::List(ref mut list) => {
                    list.push_back(value);
                    list.len() as u64
                }
                Value::Str(_) => return Err(wrong_type("rpush")),
            }
        };
        self.pushed.notify_waiters();
        Ok(len)
    }

    async fn llen(&self, key: &str) -> Result<u64> {
        self.check("llen")?;
        self.with_live(key, |entry| match entry.map(|e| &e.value) {
            None => Ok(0),
            Some(Value::List(list)) => Ok(list.len() as u64),
            Some(Value::Str(_)) => Err(wrong_type("llen")),
        })
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()> {
        self.check("ltrim")?;
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(key) else {
            return Ok(());
        };
        let Value::List(ref mut list) = entry.value else {
            return Err(wrong_type("ltrim"));
        };
        match trim_range(list.len(), start, stop) {
            Some((from, to)) => {
                list.truncate(to + 1);
                list.drain(..from);
            }
            None => {
                entries.remove(key);
            }
        }
        Ok(())
    }

    async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let deadline = Instant::now() + timeout;
        loop {
            self.check("blpop")?;

            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.pop_front(key)? {
                return Ok(Some(item));
            }

            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
            }
        }
    }
}
