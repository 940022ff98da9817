//! Step 4: persist the order, its items and the ORDER_COMPLETED outbox row
//! in one transaction, then nudge the dispatcher.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use orderflow_core::clock::Clock;
use orderflow_core::error::Error;
use orderflow_core::outbox::DispatcherHandle;
use orderflow_core::types::{MessageType, OrderStatus};
use orderflow_postgres::PgStores;
use crate::step::{OrderSnapshot, SagaStep};
use crate::steps::db;

/// Persists the order aggregate and its outbox message atomically. The
/// dispatcher wakeup fires only after the commit returns, so the message is
/// durable before anything tries to publish it.
///
/// Within a saga run this step is terminal, so its compensation never runs
/// mid-saga; the cancellation path invokes it to flip the order to CANCELLED
/// and emit ORDER_CANCELLED.
pub struct CreateOrderStep {
    stores: Arc<PgStores>,
    clock: Arc<dyn Clock>,
    dispatcher: DispatcherHandle,
}

impl CreateOrderStep {
    /// Stable step name, as recorded in execution trails and failure records.
    pub const NAME: &'static str = "CreateOrderStep";

    /// Create the step.
    #[must_use]
    pub fn new(stores: Arc<PgStores>, clock: Arc<dyn Clock>, dispatcher: DispatcherHandle) -> Self {
        Self { stores, clock, dispatcher }
    }
}

#[async_trait]
impl SagaStep for CreateOrderStep {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn order(&self) -> u32 {
        4
    }

    async fn execute(&self, snapshot: &mut OrderSnapshot) -> Result<(), Error> {
        let now = self.clock.now();
        let mut tx = self.stores.pool().begin().await.map_err(db)?;

        let order_id = self
            .stores
            .orders
            .insert_order(
                &mut tx,
                snapshot.user_id,
                snapshot.coupon_id,
                snapshot.subtotal,
                snapshot.coupon_discount,
                snapshot.final_amount,
                now,
            )
            .await?;
        self.stores
            .orders
            .insert_items(&mut tx, order_id, &snapshot.items)
            .await?;

        let payload = json!({
            "order_id": order_id,
            "user_id": snapshot.user_id,
            "final_amount": snapshot.final_amount,
            "occurred_at": now.to_rfc3339(),
        });
        self.stores
            .outbox
            .save(
                &mut tx,
                Some(order_id),
                snapshot.user_id,
                MessageType::OrderCompleted,
                &payload,
            )
            .await?;

        tx.commit().await.map_err(db)?;

        snapshot.order_id = Some(order_id);
        self.dispatcher.wake();

        tracing::info!(
            order_id = order_id.get(),
            user_id = snapshot.user_id.get(),
            final_amount = snapshot.final_amount.minor(),
            "Order created"
        );
        Ok(())
    }

    async fn compensate(&self, snapshot: &OrderSnapshot) -> Result<(), Error> {
        let Some(order_id) = snapshot.order_id else {
            // Nothing durable to undo; the forward insert never committed.
            return Ok(());
        };

        let now = self.clock.now();
        let mut tx = self.stores.pool().begin().await.map_err(db)?;

        let order = self
            .stores
            .orders
            .find_by_id_for_update(&mut tx, order_id)
            .await?;
        if order.status != OrderStatus::Completed {
            return Err(Error::OrderNotCancellable {
                order_id,
                status: order.status.as_str().to_string(),
            });
        }

        self.stores.orders.mark_cancelled(&mut tx, order_id, now).await?;

        let payload = json!({
            "order_id": order_id,
            "user_id": order.user_id,
            "final_amount": order.final_amount,
            "occurred_at": now.to_rfc3339(),
            "cancelled_at": now.to_rfc3339(),
        });
        self.stores
            .outbox
            .save(
                &mut tx,
                Some(order_id),
                order.user_id,
                MessageType::OrderCancelled,
                &payload,
            )
            .await?;

        tx.commit().await.map_err(db)?;
        self.dispatcher.wake();
        Ok(())
    }
}
