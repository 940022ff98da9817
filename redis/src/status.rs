//! Redis-backed async status store.
//!
//! One JSON record per request id under `coupon:request:{request_id}`.
//! PENDING/RETRY records carry the short TTL, terminal records the long one;
//! Redis expiry is the sweeper, nothing polls for stale rows. Workers write
//! each terminal state at most once and PENDING is written only at enqueue
//! time, so last-writer-wins semantics are safe.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, SetExpiry, SetOptions};
use serde::{Deserialize, Serialize};

use orderflow_core::config::StatusConfig;
use orderflow_core::error::Error;
use orderflow_core::status::StatusStore;
use orderflow_core::types::{
    AsyncStatus, CouponRequest, RequestId, RequestState, UserCouponView,
};

use crate::kv_err;

/// The persisted record behind one [`AsyncStatus`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StatusRecord {
    request_id: RequestId,
    state: RequestState,
    result: Option<UserCouponView>,
    error: Option<String>,
    retry_count: u32,
    enqueued_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl StatusRecord {
    fn to_status(&self, now: DateTime<Utc>) -> AsyncStatus {
        let until = if self.state.is_terminal() { self.updated_at } else { now };
        let waiting_ms =
            u64::try_from((until - self.enqueued_at).num_milliseconds()).unwrap_or(0);
        AsyncStatus {
            request_id: self.request_id,
            state: self.state,
            result: self.result.clone(),
            error: self.error.clone(),
            waiting_ms,
        }
    }
}

/// Redis-backed [`StatusStore`].
#[derive(Clone)]
pub struct RedisStatusStore {
    conn: ConnectionManager,
    config: StatusConfig,
}

impl RedisStatusStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kv`] if the connection cannot be established.
    pub async fn new(redis_url: &str, config: StatusConfig) -> Result<Self, Error> {
        let client = Client::open(redis_url).map_err(kv_err)?;
        let conn = ConnectionManager::new(client).await.map_err(kv_err)?;
        Ok(Self { conn, config })
    }

    /// Build a store over an existing connection manager.
    #[must_use]
    pub fn from_connection(conn: ConnectionManager, config: StatusConfig) -> Self {
        Self { conn, config }
    }

    fn status_key(request_id: RequestId) -> String {
        format!("coupon:request:{request_id}")
    }

    async fn read(&self, request_id: RequestId) -> Result<Option<StatusRecord>, Error> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(Self::status_key(request_id))
            .await
            .map_err(kv_err)?;
        raw.map(|s| serde_json::from_str(&s).map_err(|e| Error::Kv(e.to_string())))
            .transpose()
    }

    async fn write(&self, record: &StatusRecord, ttl_ms: u64) -> Result<(), Error> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(record).map_err(|e| Error::Kv(e.to_string()))?;
        let opts = SetOptions::default().with_expiration(SetExpiry::PX(ttl_ms));
        let _: () = conn
            .set_options(Self::status_key(record.request_id), raw, opts)
            .await
            .map_err(kv_err)?;
        Ok(())
    }

    /// Write a terminal record, keeping the original `enqueued_at` when the
    /// pending record is still around so `waiting_ms` stays truthful.
    async fn finish(
        &self,
        request_id: RequestId,
        state: RequestState,
        result: Option<UserCouponView>,
        error: Option<String>,
    ) -> Result<(), Error> {
        let now = Utc::now();
        let previous = self.read(request_id).await?;
        let record = StatusRecord {
            request_id,
            state,
            result,
            error,
            retry_count: previous.as_ref().map_or(0, |r| r.retry_count),
            enqueued_at: previous.map_or(now, |r| r.enqueued_at),
            updated_at: now,
        };
        self.write(&record, self.config.ttl_terminal_ms).await
    }
}

#[async_trait]
impl StatusStore for RedisStatusStore {
    async fn put_pending(&self, request: &CouponRequest) -> Result<(), Error> {
        let record = StatusRecord {
            request_id: request.request_id,
            state: RequestState::Pending,
            result: None,
            error: None,
            retry_count: 0,
            enqueued_at: request.enqueued_at,
            updated_at: Utc::now(),
        };
        self.write(&record, self.config.ttl_pending_ms).await
    }

    async fn mark_retry(&self, request: &CouponRequest) -> Result<(), Error> {
        let record = StatusRecord {
            request_id: request.request_id,
            state: RequestState::Retry,
            result: None,
            error: None,
            retry_count: request.retry_count,
            enqueued_at: request.enqueued_at,
            updated_at: Utc::now(),
        };
        self.write(&record, self.config.ttl_pending_ms).await
    }

    async fn complete(&self, request_id: RequestId, view: &UserCouponView) -> Result<(), Error> {
        self.finish(request_id, RequestState::Completed, Some(view.clone()), None)
            .await
    }

    async fn fail(&self, request_id: RequestId, reason: &str) -> Result<(), Error> {
        self.finish(request_id, RequestState::Failed, None, Some(reason.to_string()))
            .await
    }

    async fn get(&self, request_id: RequestId) -> Result<AsyncStatus, Error> {
        match self.read(request_id).await? {
            Some(record) => Ok(record.to_status(Utc::now())),
            None => Ok(AsyncStatus::not_found(request_id)),
        }
    }
}
