//! Order cancellation.
//!
//! Cancellation is the LIFO compensation of a completed saga, rebuilt from
//! durable state: mark the order CANCELLED and emit ORDER_CANCELLED (step
//! 4's compensation), release the coupon (3), refund the wallet (2), restore
//! stock (1). The order-row lock inside step 4's compensation makes repeated
//! cancellation a business error, never a double restore.

use std::collections::HashSet;
use std::sync::Arc;

use orderflow_core::clock::Clock;
use orderflow_core::compensation::CompensationFailure;
use orderflow_core::error::Error;
use orderflow_core::types::{CancelReport, Money, OrderId, OrderLine, OrderStatus, UserId};
use orderflow_postgres::PgStores;

use crate::compensation::FailureCompensationHandler;
use crate::step::{OrderSnapshot, SagaStep};
use crate::steps::{db, DeductBalanceStep, DeductInventoryStep, UseCouponStep};

/// Cancels completed orders by replaying step compensations in reverse.
pub struct OrderCancellationService {
    stores: Arc<PgStores>,
    steps: Vec<Arc<dyn SagaStep>>,
    handler: FailureCompensationHandler,
    clock: Arc<dyn Clock>,
}

impl OrderCancellationService {
    /// Create the service over the same step set the orchestrator runs.
    #[must_use]
    pub fn new(
        stores: Arc<PgStores>,
        mut steps: Vec<Arc<dyn SagaStep>>,
        handler: FailureCompensationHandler,
        clock: Arc<dyn Clock>,
    ) -> Self {
        steps.sort_by_key(|step| step.order());
        Self { stores, steps, handler, clock }
    }

    /// Cancel `order_id` on behalf of `acting_user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OrderNotFound`], [`Error::NotOrderOwner`],
    /// [`Error::OrderNotCancellable`] for rejected requests, or a
    /// compensation error when an undo step failed critically.
    pub async fn cancel_order(
        &self,
        order_id: OrderId,
        acting_user_id: UserId,
    ) -> Result<CancelReport, Error> {
        let order = self.stores.orders.find_by_id(order_id).await?;
        if order.user_id != acting_user_id {
            return Err(Error::NotOrderOwner { order_id, user_id: acting_user_id });
        }
        if order.status != OrderStatus::Completed {
            return Err(Error::OrderNotCancellable {
                order_id,
                status: order.status.as_str().to_string(),
            });
        }

        let items = {
            let mut conn = self.stores.pool().acquire().await.map_err(db)?;
            self.stores.orders.find_items(&mut conn, order_id).await?
        };
        let lines: Vec<OrderLine> = items
            .iter()
            .map(|item| OrderLine {
                product_id: item.product_id,
                option_id: item.option_id,
                product_name: item.product_name.clone(),
                option_name: item.option_name.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
            })
            .collect();
        let line_count = lines.len();

        let snapshot = OrderSnapshot::for_cancellation(
            order_id,
            order.user_id,
            order.coupon_id,
            order.coupon_discount,
            order.subtotal,
            order.final_amount,
            lines,
        );

        // Best-effort failures keep the walk going, so the report must come
        // from what actually committed, not from the pre-cancellation rows.
        let mut undone: HashSet<&'static str> = HashSet::new();
        for (position, step) in self.steps.iter().rev().enumerate() {
            match step.compensate(&snapshot).await {
                Ok(()) => {
                    undone.insert(step.name());
                }
                // The cancel-mark runs first; if it is rejected nothing has
                // been undone yet and the caller gets the rejection as-is.
                // A concurrent cancel loses here, under the row lock.
                Err(e) if position == 0 => return Err(e),
                Err(e) => {
                    let failure = CompensationFailure {
                        order_id: Some(order_id),
                        user_id: order.user_id,
                        step_name: step.name(),
                        step_order: step.order(),
                        error: e,
                        context_snapshot: snapshot.to_json(),
                    };
                    self.handler.handle(failure).await?;
                }
            }
        }

        let refunded = if undone.contains(DeductBalanceStep::NAME) {
            order.final_amount
        } else {
            Money::ZERO
        };
        let restored_items = if undone.contains(DeductInventoryStep::NAME) {
            line_count
        } else {
            0
        };
        let coupon_released =
            order.coupon_id.is_some() && undone.contains(UseCouponStep::NAME);

        let cancelled = self.stores.orders.find_by_id(order_id).await?;
        metrics::counter!("saga.cancelled").increment(1);
        tracing::info!(
            order_id = order_id.get(),
            user_id = acting_user_id.get(),
            refunded = refunded.minor(),
            restored_items = restored_items,
            coupon_released = coupon_released,
            "Order cancellation finished"
        );

        Ok(CancelReport {
            order_id,
            refunded,
            restored_items,
            coupon_released,
            cancelled_at: cancelled.cancelled_at.unwrap_or_else(|| self.clock.now()),
        })
    }
}
