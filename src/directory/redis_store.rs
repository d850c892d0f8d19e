//! Redis-backed directory store

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, FromRedisValue};
use tracing::info;

use super::store::DirectoryStore;
use crate::error::{Error, Result};

/// Store over a shared Redis instance
///
/// Regular commands share one auto-reconnecting connection. Blocking pops
/// run on a second one so a waiting `BLPOP` never delays peer lookups or
/// queue pushes. Both reconnect after the server drops them.
pub struct RedisStore {
    conn: ConnectionManager,
    blocking: ConnectionManager,
}

impl RedisStore {
    /// Connect to `url` (`redis://host:port/db`)
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url).map_err(|e| Error::store("connect", e))?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| Error::store("connect", e))?;
        let blocking = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::store("connect", e))?;

        info!(url = %redacted(url), "Connected to directory store");
        Ok(Self { conn, blocking })
    }

    async fn query<T: FromRedisValue>(&self, op: &'static str, cmd: &redis::Cmd) -> Result<T> {
        let mut conn = self.conn.clone();
        cmd.query_async::<_, T>(&mut conn)
            .await
            .map_err(|e| Error::store(op, e))
    }
}

/// Hide credentials when logging a store URL
fn redacted(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("***"));
            parsed.to_string()
        }
        _ => url.to_string(),
    }
}

#[async_trait]
impl DirectoryStore for RedisStore {
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("EX").arg(ttl.as_secs().max(1));
        self.query("set", &cmd).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.query("get", redis::cmd("GET").arg(key)).await
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.query::<i64>("del", redis::cmd("DEL").arg(key)).await?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut cmd = redis::cmd("EXPIRE");
        cmd.arg(key).arg(ttl.as_secs().max(1));
        self.query("expire", &cmd).await
    }

    async fn rpush(&self, key: &str, value: Vec<u8>) -> Result<u64> {
        self.query("rpush", redis::cmd("RPUSH").arg(key).arg(value)).await
    }

    async fn llen(&self, key: &str) -> Result<u64> {
        self.query("llen", redis::cmd("LLEN").arg(key)).await
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()> {
        self.query("ltrim", redis::cmd("LTRIM").arg(key).arg(start).arg(stop))
            .await
    }

    async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<Vec<u8>>> {
        if timeout.is_zero() {
            return self.query("lpop", redis::cmd("LPOP").arg(key)).await;
        }

        let mut conn = self.blocking.clone();
        let popped: Option<(String, Vec<u8>)> = redis::cmd("BLPOP")
            .arg(key)
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::store("blpop", e))?;
        Ok(popped.map(|(_, value)| value))
    }
}
