//! Terminal saga events.
//!
//! These are in-process signals for observers (request handlers, tests,
//! metrics). The durable facts — `ORDER_COMPLETED`, `ORDER_CANCELLED` —
//! travel through the outbox, not through this channel.

use serde::Serialize;
use tokio::sync::broadcast;

use orderflow_core::types::{Money, OrderId, UserId};

/// The single terminal event every saga run emits.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum OrderSagaEvent {
    /// All steps committed.
    Completed {
        /// The durable order.
        order_id: OrderId,
        /// Buyer.
        user_id: UserId,
        /// Amount debited.
        final_amount: Money,
    },
    /// A step failed and compensation finished (possibly with recorded
    /// best-effort failures).
    Failed {
        /// The order, if the saga got far enough to create one.
        order_id: Option<OrderId>,
        /// Buyer.
        user_id: UserId,
        /// The error that stopped the saga.
        error: String,
    },
    /// A critical compensation failure halted the rollback.
    CompensationFailed {
        /// The order, if the saga got far enough to create one.
        order_id: Option<OrderId>,
        /// Buyer.
        user_id: UserId,
        /// The critical error.
        error: String,
    },
}

/// Broadcast channel of [`OrderSagaEvent`]s.
#[derive(Clone)]
pub struct SagaEvents {
    tx: broadcast::Sender<OrderSagaEvent>,
}

impl SagaEvents {
    /// Create a channel retaining up to `capacity` undelivered events per
    /// subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to terminal events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<OrderSagaEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. Lagging or absent subscribers are not an error.
    pub fn emit(&self, event: OrderSagaEvent) {
        tracing::debug!(event = ?event, "Saga event");
        let _ = self.tx.send(event);
    }
}

impl Default for SagaEvents {
    fn default() -> Self {
        Self::new(64)
    }
}
