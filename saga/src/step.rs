//! The saga step contract and the snapshot threaded through a saga run.

use async_trait::async_trait;
use serde::Serialize;

use orderflow_core::error::Error;
use orderflow_core::types::{CouponId, Money, OrderId, OrderLine, UserId};

/// The caller's input to [`crate::orchestrator::OrderSagaOrchestrator::execute`].
///
/// Totals are computed by the caller (pricing lives outside the core); the
/// orchestrator verifies their consistency before any step runs.
#[derive(Clone, Debug, Serialize)]
pub struct OrderRequest {
    /// Buyer.
    pub user_id: UserId,
    /// Requested lines; at least one, each with quantity >= 1.
    pub items: Vec<OrderLine>,
    /// Coupon to consume, if any.
    pub coupon_id: Option<CouponId>,
    /// Discount the caller computed for that coupon.
    pub coupon_discount: Money,
    /// Sum of line subtotals.
    pub subtotal: Money,
    /// `max(0, subtotal - coupon_discount)`.
    pub final_amount: Money,
}

impl OrderRequest {
    /// Check the request before the saga starts. Violations are business
    /// errors and no step ever runs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyOrder`], [`Error::InvalidQuantity`] or
    /// [`Error::AmountMismatch`].
    pub fn validate(&self) -> Result<(), Error> {
        if self.items.is_empty() {
            return Err(Error::EmptyOrder);
        }
        for line in &self.items {
            if line.quantity < 1 {
                return Err(Error::InvalidQuantity(line.quantity));
            }
        }
        let expected = self.subtotal.saturating_sub(self.coupon_discount);
        if expected != self.final_amount {
            return Err(Error::AmountMismatch {
                expected,
                actual: self.final_amount,
            });
        }
        Ok(())
    }
}

/// The mutable state a saga run threads through its steps.
///
/// Steps read the caller's inputs from here; `CreateOrderStep` writes
/// `order_id` back so later concerns (cancellation, failure records) can
/// reach the durable order. The execution trail records, in commit order,
/// the steps whose forward work succeeded — a failed step is never on it.
#[derive(Clone, Debug, Serialize)]
pub struct OrderSnapshot {
    /// Buyer.
    pub user_id: UserId,
    /// Requested lines.
    pub items: Vec<OrderLine>,
    /// Coupon to consume, if any.
    pub coupon_id: Option<CouponId>,
    /// Discount applied.
    pub coupon_discount: Money,
    /// Sum of line subtotals.
    pub subtotal: Money,
    /// Amount to debit.
    pub final_amount: Money,
    /// Set by `CreateOrderStep` once the order row is durable.
    pub order_id: Option<OrderId>,
    trail: Vec<&'static str>,
}

impl OrderSnapshot {
    /// Build the snapshot for a fresh saga run.
    #[must_use]
    pub fn from_request(request: OrderRequest) -> Self {
        Self {
            user_id: request.user_id,
            items: request.items,
            coupon_id: request.coupon_id,
            coupon_discount: request.coupon_discount,
            subtotal: request.subtotal,
            final_amount: request.final_amount,
            order_id: None,
            trail: Vec::new(),
        }
    }

    /// Rebuild a snapshot from a durable order, for the cancellation path.
    #[must_use]
    pub fn for_cancellation(
        order_id: OrderId,
        user_id: UserId,
        coupon_id: Option<CouponId>,
        coupon_discount: Money,
        subtotal: Money,
        final_amount: Money,
        items: Vec<OrderLine>,
    ) -> Self {
        Self {
            user_id,
            items,
            coupon_id,
            coupon_discount,
            subtotal,
            final_amount,
            order_id: Some(order_id),
            trail: Vec::new(),
        }
    }

    /// Record a step whose `execute` committed.
    pub fn record(&mut self, step_name: &'static str) {
        self.trail.push(step_name);
    }

    /// Steps whose forward work committed, in commit order.
    #[must_use]
    pub fn trail(&self) -> &[&'static str] {
        &self.trail
    }

    /// JSON rendering for failure records.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// One step of the order saga.
///
/// `execute` and `compensate` each run in their own database transaction —
/// never joined to an outer one; the orchestrator holds no transaction.
/// Compensation must be idempotent and must take its facts from durable
/// state where it exists (the order row and its items), so a restarted
/// compensation converges instead of double-restoring.
#[async_trait]
pub trait SagaStep: Send + Sync {
    /// Stable name, used in the execution trail and failure records.
    fn name(&self) -> &'static str;

    /// Position in the forward sequence (1-based). Duplicates across a step
    /// set are a configuration error caught at orchestrator construction.
    fn order(&self) -> u32;

    /// Apply the step's forward effect in its own transaction.
    ///
    /// # Errors
    ///
    /// Business errors abort the saga without retry; conflict and transient
    /// errors are retried by the orchestrator before it gives up.
    async fn execute(&self, snapshot: &mut OrderSnapshot) -> Result<(), Error>;

    /// Undo the step's forward effect in its own transaction.
    ///
    /// # Errors
    ///
    /// Any error is routed through the failure compensation handler; only
    /// errors it classifies critical halt the remaining compensations.
    async fn compensate(&self, snapshot: &OrderSnapshot) -> Result<(), Error>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code
mod tests {
    use super::*;
    use orderflow_core::types::{OptionId, ProductId};

    fn line(quantity: u32) -> OrderLine {
        OrderLine {
            product_id: ProductId::new(1),
            option_id: OptionId::new(101),
            product_name: "p".to_string(),
            option_name: "o".to_string(),
            quantity,
            unit_price: Money::from_minor(10_000),
        }
    }

    fn request() -> OrderRequest {
        OrderRequest {
            user_id: UserId::new(1),
            items: vec![line(2)],
            coupon_id: None,
            coupon_discount: Money::ZERO,
            subtotal: Money::from_minor(20_000),
            final_amount: Money::from_minor(20_000),
        }
    }

    #[test]
    fn valid_request_passes() {
        request().validate().unwrap();
    }

    #[test]
    fn empty_order_is_rejected() {
        let mut r = request();
        r.items.clear();
        assert!(matches!(r.validate(), Err(Error::EmptyOrder)));
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let mut r = request();
        r.items[0].quantity = 0;
        assert!(matches!(r.validate(), Err(Error::InvalidQuantity(0))));
    }

    #[test]
    fn inconsistent_totals_are_rejected() {
        let mut r = request();
        r.coupon_discount = Money::from_minor(50_000);
        // final must clamp to zero when the discount exceeds the subtotal
        assert!(matches!(r.validate(), Err(Error::AmountMismatch { .. })));
        r.final_amount = Money::ZERO;
        r.validate().unwrap();
    }

    #[test]
    fn trail_records_in_order() {
        let mut snapshot = OrderSnapshot::from_request(request());
        snapshot.record("A");
        snapshot.record("B");
        assert_eq!(snapshot.trail(), &["A", "B"]);
    }
}
