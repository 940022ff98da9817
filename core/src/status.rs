//! Async status seam for the coupon pipeline's polling API.
//!
//! One short-lived record per request id. PENDING is written exactly once at
//! enqueue time; workers write RETRY on re-queue and exactly one terminal
//! state. Rows expire on their own (≈30 minutes pending, ≈24 hours terminal).

use async_trait::async_trait;

use crate::error::Error;
use crate::types::{AsyncStatus, CouponRequest, RequestId, UserCouponView};

/// Store of per-request status records.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Record a freshly enqueued request as PENDING.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kv`] on store failure.
    async fn put_pending(&self, request: &CouponRequest) -> Result<(), Error>;

    /// Record that the request was re-queued after a transient failure.
    /// `request.retry_count` carries the bumped attempt count.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kv`] on store failure.
    async fn mark_retry(&self, request: &CouponRequest) -> Result<(), Error>;

    /// Record successful issuance.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kv`] on store failure.
    async fn complete(&self, request_id: RequestId, view: &UserCouponView) -> Result<(), Error>;

    /// Record a terminal failure with a caller-readable reason.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kv`] on store failure.
    async fn fail(&self, request_id: RequestId, reason: &str) -> Result<(), Error>;

    /// Look up the status of a request. Unknown ids yield
    /// [`crate::types::RequestState::NotFound`], not an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kv`] on store failure.
    async fn get(&self, request_id: RequestId) -> Result<AsyncStatus, Error>;
}
