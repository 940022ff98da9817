//! External event-log seam.
//!
//! The dispatcher publishes outbox rows through this trait; the production
//! implementation is the Redpanda producer, tests use a recording in-memory
//! log. Delivery is at-least-once — downstream consumers dedupe on
//! `(order_id, event_type)`.

use async_trait::async_trait;

use crate::error::Error;

/// A keyed, partitioned, append-only event log.
///
/// Messages sharing a key land in the same partition and keep their relative
/// order; there is no ordering guarantee across keys.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Publish `payload` to `topic` under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Publish`] when the broker rejects or times out the
    /// delivery.
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), Error>;
}
