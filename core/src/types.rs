//! Domain types for the Orderflow transactional core.
//!
//! This module contains the identifiers, value objects and entities shared by
//! the saga and the coupon pipeline. Entity ids are `i64` newtypes because
//! every row lives behind a bigint identity column and the event-log key is
//! the decimal rendering of the order id; the only random identifier is the
//! coupon [`RequestId`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::Error;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wrap a raw database id.
            #[must_use]
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// Get the raw id.
            #[must_use]
            pub const fn get(&self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

entity_id!(
    /// Unique identifier for a user.
    UserId
);
entity_id!(
    /// Unique identifier for a product.
    ProductId
);
entity_id!(
    /// Unique identifier for a product option (the stock-keeping unit).
    OptionId
);
entity_id!(
    /// Unique identifier for a coupon.
    CouponId
);
entity_id!(
    /// Unique identifier for an issued user coupon.
    UserCouponId
);
entity_id!(
    /// Unique identifier for an order.
    OrderId
);
entity_id!(
    /// Unique identifier for an order line item.
    OrderItemId
);
entity_id!(
    /// Unique identifier for an outbox message.
    MessageId
);

/// Unique identifier for a queued coupon issuance request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new random `RequestId`.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `RequestId` from a `Uuid`.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Money
// ============================================================================

/// An amount in minor currency units (never fractional).
///
/// All balances, prices and discounts are carried as `Money`. Arithmetic is
/// explicit and checked at the call site; the type itself never goes
/// negative silently.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Zero amount.
    pub const ZERO: Self = Self(0);

    /// Wrap an amount of minor units.
    #[must_use]
    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    /// Get the raw minor-unit amount.
    #[must_use]
    pub const fn minor(&self) -> i64 {
        self.0
    }

    /// Add two amounts, saturating at `i64::MAX`.
    #[must_use]
    pub const fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// Subtract, clamping at zero. Used for `final_amount = max(0, subtotal - discount)`.
    #[must_use]
    pub const fn saturating_sub(self, other: Self) -> Self {
        let v = self.0 - other.0;
        if v < 0 { Self(0) } else { Self(v) }
    }

    /// Subtract, returning `None` when the result would be negative.
    #[must_use]
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        let v = self.0 - other.0;
        if v < 0 { None } else { Some(Self(v)) }
    }

    /// Multiply by an integer quantity.
    #[must_use]
    pub const fn times(self, quantity: u32) -> Self {
        Self(self.0 * quantity as i64)
    }

    /// The smaller of two amounts.
    #[must_use]
    pub const fn min(self, other: Self) -> Self {
        if self.0 <= other.0 { self } else { other }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Users and products
// ============================================================================

/// A user wallet row. Mutated only under the `user:balance:{user_id}` lock
/// and a pessimistic row lock; `balance` is non-negative at every commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    /// Row id.
    pub user_id: UserId,
    /// Wallet balance in minor units.
    pub balance: Money,
    /// Optimistic version, bumped on every mutation.
    pub version: i64,
}

/// A product row. Read-only from the core's point of view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Product {
    /// Row id.
    pub product_id: ProductId,
    /// Display name, snapshotted onto order items.
    pub name: String,
    /// Current unit price.
    pub price: Money,
}

/// A product option row carrying the sellable stock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProductOption {
    /// Row id.
    pub option_id: OptionId,
    /// Owning product.
    pub product_id: ProductId,
    /// Display name, snapshotted onto order items.
    pub option_name: String,
    /// Remaining stock; never negative.
    pub stock: i32,
    /// Optimistic version, bumped on every mutation.
    pub version: i64,
}

// ============================================================================
// Coupons
// ============================================================================

/// How a coupon reduces the order subtotal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscountType {
    /// Fixed reduction in minor units, capped at the subtotal.
    FixedAmount,
    /// Fractional reduction of the subtotal.
    Percentage,
}

impl DiscountType {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FixedAmount => "FIXED_AMOUNT",
            Self::Percentage => "PERCENTAGE",
        }
    }

    /// Parse from the database string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the string doesn't match a known type.
    pub fn parse(s: &str) -> Result<Self, Error> {
        match s {
            "FIXED_AMOUNT" => Ok(Self::FixedAmount),
            "PERCENTAGE" => Ok(Self::Percentage),
            _ => Err(Error::Internal(format!("invalid discount type: {s}"))),
        }
    }
}

/// A limited-quantity coupon.
///
/// Invariant: `0 <= remaining_qty <= total_qty`; when `remaining_qty` hits
/// zero, `is_active` flips to false in the same row update.
#[derive(Clone, Debug, PartialEq)]
pub struct Coupon {
    /// Row id.
    pub coupon_id: CouponId,
    /// Display name.
    pub name: String,
    /// Discount semantics.
    pub discount_type: DiscountType,
    /// Fixed reduction (minor units); meaningful for `FixedAmount`.
    pub discount_amount: Money,
    /// Fractional reduction in `[0, 1]`; meaningful for `Percentage`.
    pub discount_rate: f64,
    /// Total quantity ever issuable.
    pub total_qty: i32,
    /// Quantity still issuable.
    pub remaining_qty: i32,
    /// Start of the validity window (inclusive).
    pub valid_from: DateTime<Utc>,
    /// End of the validity window (inclusive).
    pub valid_until: DateTime<Utc>,
    /// Whether the coupon can still be issued.
    pub is_active: bool,
    /// Optimistic version, bumped on every mutation.
    pub version: i64,
}

impl Coupon {
    /// Whether `now` falls inside the validity window.
    #[must_use]
    pub fn is_within_window(&self, now: DateTime<Utc>) -> bool {
        self.valid_from <= now && now <= self.valid_until
    }

    /// The discount this coupon grants against `subtotal`.
    ///
    /// Fixed discounts are capped at the subtotal so the final amount never
    /// goes negative; percentage discounts round half-up on the minor unit.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn discount_for(&self, subtotal: Money) -> Money {
        match self.discount_type {
            DiscountType::FixedAmount => self.discount_amount.min(subtotal),
            DiscountType::Percentage => {
                let raw = (subtotal.minor() as f64 * self.discount_rate).round() as i64;
                Money::from_minor(raw).min(subtotal)
            }
        }
    }
}

/// Lifecycle of an issued user coupon.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserCouponStatus {
    /// Issued and available for use.
    Unused,
    /// Consumed by a completed order.
    Used,
    /// Validity window elapsed before use.
    Expired,
    /// Withdrawn.
    Cancelled,
}

impl UserCouponStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unused => "UNUSED",
            Self::Used => "USED",
            Self::Expired => "EXPIRED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Parse from the database string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, Error> {
        match s {
            "UNUSED" => Ok(Self::Unused),
            "USED" => Ok(Self::Used),
            "EXPIRED" => Ok(Self::Expired),
            "CANCELLED" => Ok(Self::Cancelled),
            _ => Err(Error::Internal(format!("invalid user coupon status: {s}"))),
        }
    }
}

/// An issued coupon held by a user. At most one row per `(user_id, coupon_id)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserCoupon {
    /// Row id.
    pub user_coupon_id: UserCouponId,
    /// Holder.
    pub user_id: UserId,
    /// Issued coupon.
    pub coupon_id: CouponId,
    /// Lifecycle status.
    pub status: UserCouponStatus,
    /// When the coupon was granted.
    pub issued_at: DateTime<Utc>,
    /// When the coupon was consumed, if it was.
    pub used_at: Option<DateTime<Utc>>,
}

/// Caller-facing view of an issued coupon, carried in async status results.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCouponView {
    /// Row id of the grant.
    pub user_coupon_id: UserCouponId,
    /// Holder.
    pub user_id: UserId,
    /// Issued coupon.
    pub coupon_id: CouponId,
    /// Lifecycle status.
    pub status: UserCouponStatus,
    /// When the coupon was granted.
    pub issued_at: DateTime<Utc>,
}

impl From<&UserCoupon> for UserCouponView {
    fn from(uc: &UserCoupon) -> Self {
        Self {
            user_coupon_id: uc.user_coupon_id,
            user_id: uc.user_id,
            coupon_id: uc.coupon_id,
            status: uc.status,
            issued_at: uc.issued_at,
        }
    }
}

// ============================================================================
// Orders
// ============================================================================

/// Order lifecycle. Once `Completed`, the only legal transition is `Cancelled`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Created but not yet paid (unused by the happy path, kept for parity
    /// with the persisted enum).
    Pending,
    /// Fully paid and persisted.
    Completed,
    /// Cancelled after completion.
    Cancelled,
    /// Terminal failure.
    Failed,
}

impl OrderStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::Failed => "FAILED",
        }
    }

    /// Parse from the database string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, Error> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "COMPLETED" => Ok(Self::Completed),
            "CANCELLED" => Ok(Self::Cancelled),
            "FAILED" => Ok(Self::Failed),
            _ => Err(Error::Internal(format!("invalid order status: {s}"))),
        }
    }
}

/// A persisted order. Invariant: `final_amount = max(0, subtotal - coupon_discount)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Order {
    /// Row id.
    pub order_id: OrderId,
    /// Buyer.
    pub user_id: UserId,
    /// Lifecycle status.
    pub status: OrderStatus,
    /// Applied coupon, if any.
    pub coupon_id: Option<CouponId>,
    /// Sum of item subtotals.
    pub subtotal: Money,
    /// Discount actually applied.
    pub coupon_discount: Money,
    /// Amount debited from the wallet.
    pub final_amount: Money,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Cancellation time, if cancelled.
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// A persisted order line. `product_name` and `option_name` are snapshots
/// taken at order time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderItem {
    /// Row id.
    pub order_item_id: OrderItemId,
    /// Owning order.
    pub order_id: OrderId,
    /// Ordered product.
    pub product_id: ProductId,
    /// Ordered option.
    pub option_id: OptionId,
    /// Product name at order time.
    pub product_name: String,
    /// Option name at order time.
    pub option_name: String,
    /// Ordered quantity, at least 1.
    pub quantity: u32,
    /// Unit price at order time.
    pub unit_price: Money,
    /// `unit_price * quantity`.
    pub subtotal: Money,
}

/// One requested line of a new order, as supplied by the caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    /// Ordered product.
    pub product_id: ProductId,
    /// Ordered option.
    pub option_id: OptionId,
    /// Product name snapshot.
    pub product_name: String,
    /// Option name snapshot.
    pub option_name: String,
    /// Ordered quantity, at least 1.
    pub quantity: u32,
    /// Unit price at order time.
    pub unit_price: Money,
}

impl OrderLine {
    /// `unit_price * quantity` for this line.
    #[must_use]
    pub const fn subtotal(&self) -> Money {
        self.unit_price.times(self.quantity)
    }
}

/// Report returned by a successful order cancellation. Every field reflects
/// what the undo steps actually committed: a compensation that failed and
/// was left as a recorded failure contributes nothing here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CancelReport {
    /// Cancelled order.
    pub order_id: OrderId,
    /// Amount actually refunded to the wallet; zero if the refund
    /// compensation failed and was recorded for replay.
    pub refunded: Money,
    /// Number of order lines whose stock restoration committed; zero if the
    /// restock compensation failed and was recorded for replay.
    pub restored_items: usize,
    /// Whether the user coupon was actually released back to `UNUSED`.
    pub coupon_released: bool,
    /// When the cancellation committed.
    pub cancelled_at: DateTime<Utc>,
}

// ============================================================================
// Outbox
// ============================================================================

/// Outbox message lifecycle.
///
/// `PENDING -> PUBLISHING -> PUBLISHED` on success; `PUBLISHING -> PENDING`
/// (retry bump) on transient publish failure; `PENDING -> ABANDONED` once the
/// retry budget is exhausted; `PUBLISHING -> FAILED` only on a non-retryable
/// publish error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboxStatus {
    /// Awaiting publication.
    Pending,
    /// Claimed by a dispatcher.
    Publishing,
    /// Delivered to the event log.
    Published,
    /// Non-retryable publish error.
    Failed,
    /// Retry budget exhausted.
    Abandoned,
}

impl OutboxStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Publishing => "PUBLISHING",
            Self::Published => "PUBLISHED",
            Self::Failed => "FAILED",
            Self::Abandoned => "ABANDONED",
        }
    }

    /// Parse from the database string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, Error> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PUBLISHING" => Ok(Self::Publishing),
            "PUBLISHED" => Ok(Self::Published),
            "FAILED" => Ok(Self::Failed),
            "ABANDONED" => Ok(Self::Abandoned),
            _ => Err(Error::Internal(format!("invalid outbox status: {s}"))),
        }
    }
}

/// The kind of domain fact an outbox message carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    /// An order completed; payload `{order_id, user_id, final_amount, occurred_at}`.
    OrderCompleted,
    /// An order was cancelled; payload additionally carries `cancelled_at`.
    OrderCancelled,
    /// A coupon was issued to a user.
    CouponIssued,
}

impl MessageType {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OrderCompleted => "ORDER_COMPLETED",
            Self::OrderCancelled => "ORDER_CANCELLED",
            Self::CouponIssued => "COUPON_ISSUED",
        }
    }

    /// The event-log topic this message type is published to.
    #[must_use]
    pub const fn topic(&self) -> &'static str {
        match self {
            Self::OrderCompleted | Self::OrderCancelled => "order-events",
            Self::CouponIssued => "coupon-events",
        }
    }

    /// Parse from the database string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the string doesn't match a known type.
    pub fn parse(s: &str) -> Result<Self, Error> {
        match s {
            "ORDER_COMPLETED" => Ok(Self::OrderCompleted),
            "ORDER_CANCELLED" => Ok(Self::OrderCancelled),
            "COUPON_ISSUED" => Ok(Self::CouponIssued),
            _ => Err(Error::Internal(format!("invalid message type: {s}"))),
        }
    }
}

/// A row of the transactional outbox.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboxMessage {
    /// Row id.
    pub message_id: MessageId,
    /// Order this message describes; absent for coupon grants.
    pub order_id: Option<OrderId>,
    /// User this message concerns.
    pub user_id: UserId,
    /// Message kind.
    pub message_type: MessageType,
    /// JSON payload published verbatim.
    pub payload: serde_json::Value,
    /// Lifecycle status.
    pub status: OutboxStatus,
    /// Publish attempts so far.
    pub retry_count: i32,
    /// Last publish attempt, if any.
    pub last_attempt: Option<DateTime<Utc>>,
    /// When the message was delivered, if it was.
    pub sent_at: Option<DateTime<Utc>>,
    /// Insertion time.
    pub created_at: DateTime<Utc>,
}

impl OutboxMessage {
    /// The event-log partition key: the decimal order id, falling back to the
    /// decimal user id for messages not tied to an order.
    #[must_use]
    pub fn partition_key(&self) -> String {
        self.order_id
            .map_or_else(|| self.user_id.to_string(), |id| id.to_string())
    }
}

// ============================================================================
// Coupon pipeline
// ============================================================================

/// A queued coupon issuance request, carried as the payload of a partitioned
/// log entry keyed by `coupon_id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponRequest {
    /// Request id handed back to the caller for polling.
    pub request_id: RequestId,
    /// Requesting user.
    pub user_id: UserId,
    /// Requested coupon.
    pub coupon_id: CouponId,
    /// When the request entered the queue.
    pub enqueued_at: DateTime<Utc>,
    /// Delivery attempts consumed so far.
    pub retry_count: u32,
}

impl CouponRequest {
    /// Build a fresh request with a random id and zero retries.
    #[must_use]
    pub fn new(user_id: UserId, coupon_id: CouponId, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            request_id: RequestId::new(),
            user_id,
            coupon_id,
            enqueued_at,
            retry_count: 0,
        }
    }
}

/// Observable state of a queued request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestState {
    /// Queued, not yet processed.
    Pending,
    /// Re-queued after a transient failure.
    Retry,
    /// Issuance committed; `result` carries the coupon view.
    Completed,
    /// Terminal business failure; `error` carries the reason.
    Failed,
    /// No record for this request id.
    NotFound,
    /// Internal error surfaced to the poller.
    Error,
}

impl RequestState {
    /// Whether polling can stop.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Error)
    }
}

/// Poll result for a queued coupon request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AsyncStatus {
    /// The polled request.
    pub request_id: RequestId,
    /// Current state.
    pub state: RequestState,
    /// Issued coupon view, present once `Completed`.
    pub result: Option<UserCouponView>,
    /// Failure reason, present once `Failed` or `Error`.
    pub error: Option<String>,
    /// Milliseconds between enqueue and now (pending) or enqueue and the
    /// terminal write (terminal states).
    pub waiting_ms: u64,
}

impl AsyncStatus {
    /// The status returned for an unknown request id.
    #[must_use]
    pub const fn not_found(request_id: RequestId) -> Self {
        Self {
            request_id,
            state: RequestState::NotFound,
            result: None,
            error: None,
            waiting_ms: 0,
        }
    }
}

// ============================================================================
// Failed compensations
// ============================================================================

/// Resolution state of a recorded compensation failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompensationStatus {
    /// Awaiting manual inspection.
    Pending,
    /// Manually resolved.
    Resolved,
}

impl CompensationStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Resolved => "RESOLVED",
        }
    }

    /// Parse from the database string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, Error> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "RESOLVED" => Ok(Self::Resolved),
            _ => Err(Error::Internal(format!("invalid compensation status: {s}"))),
        }
    }
}

/// A durably recorded compensation failure. This is the saga's dead-letter
/// store; every compensation error produces exactly one row.
#[derive(Clone, Debug, PartialEq)]
pub struct FailedCompensation {
    /// Row id.
    pub id: i64,
    /// Order the saga was building, if it got that far.
    pub order_id: Option<OrderId>,
    /// User the saga was acting for.
    pub user_id: UserId,
    /// Name of the step whose compensation failed.
    pub step_name: String,
    /// Order of the step whose compensation failed.
    pub step_order: u32,
    /// Human-readable error.
    pub error_message: String,
    /// Debug rendering of the error chain.
    pub error_details: Option<String>,
    /// When the compensation failed.
    pub failed_at: DateTime<Utc>,
    /// Manual replay attempts.
    pub retry_count: i32,
    /// Resolution state.
    pub status: CompensationStatus,
    /// JSON snapshot of the saga state at failure time.
    pub context_snapshot: serde_json::Value,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn coupon(discount_type: DiscountType, amount: i64, rate: f64) -> Coupon {
        Coupon {
            coupon_id: CouponId::new(1),
            name: "test".to_string(),
            discount_type,
            discount_amount: Money::from_minor(amount),
            discount_rate: rate,
            total_qty: 10,
            remaining_qty: 10,
            valid_from: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            valid_until: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            is_active: true,
            version: 0,
        }
    }

    #[test]
    fn fixed_discount_is_capped_at_subtotal() {
        let c = coupon(DiscountType::FixedAmount, 50_000, 0.0);
        let discount = c.discount_for(Money::from_minor(20_000));
        assert_eq!(discount, Money::from_minor(20_000));
        assert_eq!(
            Money::from_minor(20_000).saturating_sub(discount),
            Money::ZERO
        );
    }

    #[test]
    fn percentage_discount_rounds_on_minor_unit() {
        let c = coupon(DiscountType::Percentage, 0, 0.1);
        assert_eq!(c.discount_for(Money::from_minor(20_000)), Money::from_minor(2_000));
        assert_eq!(
            Money::from_minor(20_000).saturating_sub(c.discount_for(Money::from_minor(20_000))),
            Money::from_minor(18_000)
        );
    }

    #[test]
    fn validity_window_is_inclusive() {
        let c = coupon(DiscountType::FixedAmount, 100, 0.0);
        assert!(c.is_within_window(c.valid_from));
        assert!(c.is_within_window(c.valid_until));
        assert!(!c.is_within_window(c.valid_until + chrono::Duration::seconds(1)));
    }

    #[test]
    fn status_strings_roundtrip() {
        for s in [
            OutboxStatus::Pending,
            OutboxStatus::Publishing,
            OutboxStatus::Published,
            OutboxStatus::Failed,
            OutboxStatus::Abandoned,
        ] {
            assert_eq!(OutboxStatus::parse(s.as_str()).unwrap(), s);
        }
        for s in [
            UserCouponStatus::Unused,
            UserCouponStatus::Used,
            UserCouponStatus::Expired,
            UserCouponStatus::Cancelled,
        ] {
            assert_eq!(UserCouponStatus::parse(s.as_str()).unwrap(), s);
        }
        assert!(OutboxStatus::parse("bogus").is_err());
    }

    #[test]
    fn partition_key_prefers_order_id() {
        let msg = OutboxMessage {
            message_id: MessageId::new(1),
            order_id: Some(OrderId::new(42)),
            user_id: UserId::new(7),
            message_type: MessageType::OrderCompleted,
            payload: serde_json::json!({}),
            status: OutboxStatus::Pending,
            retry_count: 0,
            last_attempt: None,
            sent_at: None,
            created_at: Utc::now(),
        };
        assert_eq!(msg.partition_key(), "42");

        let coupon_msg = OutboxMessage {
            order_id: None,
            message_type: MessageType::CouponIssued,
            ..msg
        };
        assert_eq!(coupon_msg.partition_key(), "7");
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn percentage_discount_stays_within_subtotal(
                subtotal in 0i64..10_000_000,
                rate in 0.0f64..=1.0,
            ) {
                let c = coupon(DiscountType::Percentage, 0, rate);
                let discount = c.discount_for(Money::from_minor(subtotal));
                prop_assert!(discount.minor() >= 0);
                prop_assert!(discount.minor() <= subtotal);
            }

            #[test]
            fn final_amount_never_goes_negative(
                subtotal in 0i64..10_000_000,
                discount in 0i64..20_000_000,
            ) {
                let final_amount = Money::from_minor(subtotal)
                    .saturating_sub(Money::from_minor(discount));
                prop_assert!(final_amount.minor() >= 0);
            }
        }
    }

    #[test]
    fn order_line_subtotal() {
        let line = OrderLine {
            product_id: ProductId::new(1),
            option_id: OptionId::new(101),
            product_name: "p".to_string(),
            option_name: "o".to_string(),
            quantity: 2,
            unit_price: Money::from_minor(10_000),
        };
        assert_eq!(line.subtotal(), Money::from_minor(20_000));
    }
}
