//! Error taxonomy for the transactional core.
//!
//! Every fallible operation surfaces one [`Error`]; callers branch on the
//! [`ErrorKind`] tag rather than matching variants, which keeps the
//! orchestrator's retry/compensate/halt decisions in one place:
//!
//! - `NotFound` — missing row, surfaced verbatim (404-equivalent upstream)
//! - `Business` — domain rule violated, never retried
//! - `Conflict` — optimistic version mismatch, retried with backoff
//! - `Transient` — infrastructure hiccup (lock timeout, DB, KV, publish),
//!   retried, then degraded to a business error
//! - `Critical` — a compensation left a durable inconsistency; alert and halt
//! - `Internal` — anything uncategorized, mapped to 5xx at the boundary

use thiserror::Error;

use crate::types::{CouponId, Money, OptionId, OrderId, ProductId, RequestId, UserId};

/// Coarse classification driving retry and compensation policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// A referenced row does not exist.
    NotFound,
    /// A domain rule rejected the operation.
    Business,
    /// Optimistic version check failed.
    Conflict,
    /// Infrastructure failure that may succeed on retry.
    Transient,
    /// Compensation failure leaving a durable inconsistency.
    Critical,
    /// Uncategorized internal failure.
    Internal,
}

/// Errors produced by the order saga and the coupon pipeline.
#[derive(Error, Debug, Clone)]
pub enum Error {
    // ------------------------------------------------------------------
    // Not-found
    // ------------------------------------------------------------------
    /// No such user.
    #[error("user not found: {0}")]
    UserNotFound(UserId),

    /// No such product.
    #[error("product not found: {0}")]
    ProductNotFound(ProductId),

    /// No such product option.
    #[error("product option not found: {0}")]
    OptionNotFound(OptionId),

    /// No such order.
    #[error("order not found: {0}")]
    OrderNotFound(OrderId),

    /// No such coupon.
    #[error("coupon not found: {0}")]
    CouponNotFound(CouponId),

    /// No user coupon for this `(user, coupon)` pair.
    #[error("no coupon {coupon_id} held by user {user_id}")]
    UserCouponNotFound {
        /// Holder.
        user_id: UserId,
        /// Coupon.
        coupon_id: CouponId,
    },

    /// No async status row for this request id.
    #[error("request not found: {0}")]
    RequestNotFound(RequestId),

    // ------------------------------------------------------------------
    // Business rules
    // ------------------------------------------------------------------
    /// Stock below the requested quantity.
    #[error("insufficient stock for option {option_id}: requested {requested}, available {available}")]
    InsufficientStock {
        /// Option whose stock ran short.
        option_id: OptionId,
        /// Quantity the order asked for.
        requested: u32,
        /// Stock on hand at check time.
        available: i32,
    },

    /// Wallet balance below the order amount.
    #[error("insufficient balance for user {user_id}: required {required}, available {available}")]
    InsufficientBalance {
        /// Debited user.
        user_id: UserId,
        /// Amount the order needs.
        required: Money,
        /// Balance at check time.
        available: Money,
    },

    /// Order line quantity below 1.
    #[error("invalid quantity: {0}")]
    InvalidQuantity(u32),

    /// Order with no lines.
    #[error("order has no items")]
    EmptyOrder,

    /// Caller-computed totals don't satisfy `final = max(0, subtotal - discount)`.
    #[error("amount mismatch: expected final amount {expected}, got {actual}")]
    AmountMismatch {
        /// `max(0, subtotal - discount)`.
        expected: Money,
        /// What the caller supplied.
        actual: Money,
    },

    /// Coupon outside its validity window.
    #[error("coupon {0} is expired")]
    CouponExpired(CouponId),

    /// Coupon deactivated.
    #[error("coupon {0} is not active")]
    CouponInactive(CouponId),

    /// No remaining quantity.
    #[error("coupon {0} is out of stock")]
    CouponExhausted(CouponId),

    /// `(user, coupon)` pair already holds a grant.
    #[error("coupon {coupon_id} already issued to user {user_id}")]
    CouponAlreadyIssued {
        /// Holder.
        user_id: UserId,
        /// Coupon.
        coupon_id: CouponId,
    },

    /// User coupon exists but is not in a usable state.
    #[error("coupon {coupon_id} held by user {user_id} is not usable (status {status})")]
    CouponNotUsable {
        /// Holder.
        user_id: UserId,
        /// Coupon.
        coupon_id: CouponId,
        /// Observed status string.
        status: String,
    },

    /// Order is not in a cancellable state.
    #[error("order {order_id} cannot be cancelled from status {status}")]
    OrderNotCancellable {
        /// The order.
        order_id: OrderId,
        /// Observed status string.
        status: String,
    },

    /// Caller does not own the order.
    #[error("user {user_id} does not own order {order_id}")]
    NotOrderOwner {
        /// The order.
        order_id: OrderId,
        /// The caller.
        user_id: UserId,
    },

    /// Saga gave up after its retry budget; the degraded terminal error.
    #[error("order creation failed: {0}")]
    OrderCreationFailed(String),

    // ------------------------------------------------------------------
    // Conflict
    // ------------------------------------------------------------------
    /// Optimistic version check failed.
    #[error("version conflict on {entity} {id}")]
    VersionConflict {
        /// Entity table name.
        entity: &'static str,
        /// Row id.
        id: i64,
    },

    // ------------------------------------------------------------------
    // Transient infrastructure
    // ------------------------------------------------------------------
    /// Distributed lock not acquired within the wait budget.
    #[error("lock timeout on key '{key}'")]
    LockTimeout {
        /// Contended lock key.
        key: String,
    },

    /// Database failure.
    #[error("database error: {0}")]
    Database(String),

    /// Key/value store failure.
    #[error("kv store error: {0}")]
    Kv(String),

    /// Event-log publish failure.
    #[error("publish failed for topic '{topic}': {reason}")]
    Publish {
        /// Target topic.
        topic: String,
        /// Broker-reported reason.
        reason: String,
    },

    /// Partition intake full; the 503-equivalent.
    #[error("coupon queue partition {partition} is full")]
    QueueFull {
        /// Saturated partition.
        partition: u32,
    },

    /// Enqueue did not finish within its deadline.
    #[error("enqueue timed out after {0} ms")]
    EnqueueTimeout(u64),

    /// Worker per-request deadline elapsed.
    #[error("issuance deadline of {0} ms elapsed")]
    Deadline(u64),

    // ------------------------------------------------------------------
    // Critical
    // ------------------------------------------------------------------
    /// A compensation failed in a way the system cannot self-heal.
    #[error("compensation failed at step '{step}' (order {order_id:?}): {reason}")]
    CompensationFailed {
        /// Step whose compensation failed.
        step: &'static str,
        /// Order under compensation, if known.
        order_id: Option<OrderId>,
        /// Underlying cause.
        reason: String,
    },

    // ------------------------------------------------------------------
    // Internal
    // ------------------------------------------------------------------
    /// Uncategorized failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Classify this error for retry and compensation policy.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::UserNotFound(_)
            | Self::ProductNotFound(_)
            | Self::OptionNotFound(_)
            | Self::OrderNotFound(_)
            | Self::CouponNotFound(_)
            | Self::UserCouponNotFound { .. }
            | Self::RequestNotFound(_) => ErrorKind::NotFound,

            Self::InsufficientStock { .. }
            | Self::InsufficientBalance { .. }
            | Self::InvalidQuantity(_)
            | Self::EmptyOrder
            | Self::AmountMismatch { .. }
            | Self::CouponExpired(_)
            | Self::CouponInactive(_)
            | Self::CouponExhausted(_)
            | Self::CouponAlreadyIssued { .. }
            | Self::CouponNotUsable { .. }
            | Self::OrderNotCancellable { .. }
            | Self::NotOrderOwner { .. }
            | Self::OrderCreationFailed(_) => ErrorKind::Business,

            Self::VersionConflict { .. } => ErrorKind::Conflict,

            Self::LockTimeout { .. }
            | Self::Database(_)
            | Self::Kv(_)
            | Self::Publish { .. }
            | Self::QueueFull { .. }
            | Self::EnqueueTimeout(_)
            | Self::Deadline(_) => ErrorKind::Transient,

            Self::CompensationFailed { .. } => ErrorKind::Critical,

            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether a step-level retry may help.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Conflict | ErrorKind::Transient)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code
mod tests {
    use super::*;

    #[test]
    fn business_errors_are_not_retryable() {
        let e = Error::InsufficientStock {
            option_id: OptionId::new(101),
            requested: 2,
            available: 1,
        };
        assert_eq!(e.kind(), ErrorKind::Business);
        assert!(!e.is_retryable());
    }

    #[test]
    fn conflict_and_transient_are_retryable() {
        assert!(Error::VersionConflict { entity: "users", id: 1 }.is_retryable());
        assert!(Error::LockTimeout { key: "user:balance:1".to_string() }.is_retryable());
        assert!(Error::Database("connection reset".to_string()).is_retryable());
    }

    #[test]
    fn compensation_failure_is_critical() {
        let e = Error::CompensationFailed {
            step: "DeductInventoryStep",
            order_id: Some(OrderId::new(5001)),
            reason: "forced".to_string(),
        };
        assert_eq!(e.kind(), ErrorKind::Critical);
        assert!(!e.is_retryable());
    }
}
