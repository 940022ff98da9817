//! Lease-bounded distributed lock over Redis.
//!
//! Acquisition is `SET key token NX PX lease` in a bounded retry loop;
//! release is a compare-and-delete script so a holder whose lease already
//! expired cannot delete a successor's lock. A crashed holder therefore
//! stalls contenders for at most the lease.

use async_trait::async_trait;
use rand::Rng;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use orderflow_core::error::Error;
use orderflow_core::lock::{DistributedLock, LockHandle};

use crate::kv_err;

/// Base delay between acquisition attempts; a random jitter of up to the
/// same amount is added so herds don't retry in lockstep.
const RETRY_BASE: Duration = Duration::from_millis(50);

const RELEASE_SCRIPT: &str = r"
    if redis.call('get', KEYS[1]) == ARGV[1] then
        return redis.call('del', KEYS[1])
    else
        return 0
    end
";

/// Redis-backed [`DistributedLock`].
#[derive(Clone)]
pub struct RedisLockProvider {
    conn: ConnectionManager,
}

impl RedisLockProvider {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kv`] if the connection cannot be established.
    pub async fn new(redis_url: &str) -> Result<Self, Error> {
        let client = Client::open(redis_url).map_err(kv_err)?;
        let conn = ConnectionManager::new(client).await.map_err(kv_err)?;
        Ok(Self { conn })
    }

    /// Build a provider over an existing connection manager.
    #[must_use]
    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    async fn try_set(&self, key: &str, token: &str, lease: Duration) -> Result<bool, Error> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(u64::try_from(lease.as_millis()).unwrap_or(u64::MAX))
            .query_async(&mut conn)
            .await
            .map_err(kv_err)?;
        Ok(reply.is_some())
    }
}

#[async_trait]
impl DistributedLock for RedisLockProvider {
    async fn try_acquire(
        &self,
        key: &str,
        wait: Duration,
        lease: Duration,
    ) -> Result<Box<dyn LockHandle>, Error> {
        let token = Uuid::new_v4().to_string();
        let deadline = Instant::now() + wait;

        loop {
            if self.try_set(key, &token, lease).await? {
                tracing::debug!(key = key, "Lock acquired");
                return Ok(Box::new(RedisLockHandle {
                    conn: self.conn.clone(),
                    key: key.to_string(),
                    token,
                    released: false,
                }));
            }

            let jitter_ms = rand::thread_rng().gen_range(0..50u64);
            let backoff = RETRY_BASE + Duration::from_millis(jitter_ms);
            if Instant::now() + backoff >= deadline {
                tracing::debug!(key = key, "Lock wait exhausted");
                return Err(Error::LockTimeout { key: key.to_string() });
            }
            tokio::time::sleep(backoff).await;
        }
    }
}

/// A held Redis lock. Release is token-checked; dropping without releasing
/// fires a best-effort delete and otherwise leaves expiry to the lease.
struct RedisLockHandle {
    conn: ConnectionManager,
    key: String,
    token: String,
    released: bool,
}

#[async_trait]
impl LockHandle for RedisLockHandle {
    async fn release(mut self: Box<Self>) -> Result<(), Error> {
        self.released = true;
        let mut conn = self.conn.clone();
        let deleted: i64 = Script::new(RELEASE_SCRIPT)
            .key(&self.key)
            .arg(&self.token)
            .invoke_async(&mut conn)
            .await
            .map_err(kv_err)?;

        if deleted == 0 {
            // Lease expired before release; a successor may already hold the key.
            tracing::warn!(key = %self.key, "Lock was gone at release time");
        } else {
            tracing::debug!(key = %self.key, "Lock released");
        }
        Ok(())
    }
}

impl Drop for RedisLockHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let mut conn = self.conn.clone();
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _: Result<i64, _> = Script::new(RELEASE_SCRIPT)
                    .key(&key)
                    .arg(&token)
                    .invoke_async(&mut conn)
                    .await;
            });
        }
        // Without a runtime the lease expiry cleans up.
    }
}
