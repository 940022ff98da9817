//! Seams between the coupon workers and the transactional issuance core.

use async_trait::async_trait;

use crate::error::Error;
use crate::types::{CouponId, CouponRequest, UserCouponView, UserId};

/// The transactional issuance routine the workers drive.
///
/// One call is one attempt: a pessimistic lock on the coupon row, the
/// validity checks, the uniqueness check, the decrement and the user-coupon
/// insert, all in one commit.
#[async_trait]
pub trait CouponIssuer: Send + Sync {
    /// Issue `coupon_id` to `user_id`.
    ///
    /// # Errors
    ///
    /// Business failures (`CouponExhausted`, `CouponAlreadyIssued`,
    /// `CouponExpired`, `CouponInactive`) are terminal; transient failures
    /// may be retried by the caller.
    async fn issue(&self, user_id: UserId, coupon_id: CouponId) -> Result<UserCouponView, Error>;
}

/// Durable dead-letter store for requests that exhausted their retry budget.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Persist a dead request with the error that killed it. Returns the row id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] on store failure.
    async fn push(&self, request: &CouponRequest, error: &str) -> Result<i64, Error>;
}
