//! Consumer-side idempotency table.
//!
//! The event log delivers at-least-once; downstream consumers record each
//! `(order_id, event_type)` pair here and drop re-deliveries the unique
//! constraint rejects.

use sqlx::PgPool;

use orderflow_core::error::Error;
use orderflow_core::types::OrderId;

use crate::{db_err, is_unique_violation};

/// Store over the `data_platform_events` dedupe table.
#[derive(Clone)]
pub struct PgPlatformEventStore {
    pool: PgPool,
}

impl PgPlatformEventStore {
    /// Create a store over the given pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record a delivered event. Returns `true` if this was the first
    /// delivery, `false` for a duplicate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] on store failure.
    pub async fn record(&self, order_id: OrderId, event_type: &str) -> Result<bool, Error> {
        let result = sqlx::query(
            r"
            INSERT INTO data_platform_events (order_id, event_type)
            VALUES ($1, $2)
            ",
        )
        .bind(order_id.get())
        .bind(event_type)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) if is_unique_violation(&e) => {
                tracing::debug!(
                    order_id = order_id.get(),
                    event_type = event_type,
                    "Duplicate event delivery dropped"
                );
                Ok(false)
            }
            Err(e) => Err(db_err(e)),
        }
    }
}
