//! Durable record of compensation failures (the saga's dead-letter store).

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Error;
use crate::types::{OrderId, UserId};

/// Everything known about a compensation failure at the moment it happened.
#[derive(Clone, Debug)]
pub struct CompensationFailure {
    /// Order the saga was building, if it got that far.
    pub order_id: Option<OrderId>,
    /// User the saga was acting for.
    pub user_id: UserId,
    /// Step whose compensation failed.
    pub step_name: &'static str,
    /// Order of that step.
    pub step_order: u32,
    /// The error the compensation returned.
    pub error: Error,
    /// JSON snapshot of the saga state, for manual replay.
    pub context_snapshot: Value,
}

/// Store of [`CompensationFailure`] records.
#[async_trait]
pub trait CompensationLog: Send + Sync {
    /// Persist a failure record. Returns the row id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] on store failure.
    async fn record(&self, failure: &CompensationFailure) -> Result<i64, Error>;
}
