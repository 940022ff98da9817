//! Durable record of saga compensation failures.
//!
//! Every compensation error produces exactly one row here; critical ones
//! additionally raise an alert and halt the saga. Rows stay PENDING until an
//! operator replays or resolves them.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use orderflow_core::compensation::{CompensationFailure, CompensationLog};
use orderflow_core::error::Error;
use orderflow_core::types::{CompensationStatus, FailedCompensation, OrderId, UserId};

use crate::db_err;

/// Postgres-backed compensation failure log.
#[derive(Clone)]
pub struct PgFailedCompensationStore {
    pool: PgPool,
}

impl PgFailedCompensationStore {
    /// Create a store over the given pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// List unresolved failures, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] on store failure.
    pub async fn list_pending(&self, limit: usize) -> Result<Vec<FailedCompensation>, Error> {
        #[allow(clippy::cast_possible_wrap)]
        let rows = sqlx::query(
            r"
            SELECT id, order_id, user_id, step_name, step_order, error_message,
                   error_details, failed_at, retry_count, status, context_snapshot
            FROM failed_compensations
            WHERE status = 'PENDING'
            ORDER BY failed_at
            LIMIT $1
            ",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(row_to_failed).collect()
    }

    /// Count unresolved failures. Useful for health checks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] on store failure.
    pub async fn count_pending(&self) -> Result<i64, Error> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM failed_compensations WHERE status = 'PENDING'",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(count)
    }

    /// Mark a failure resolved after manual intervention.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] on store failure.
    pub async fn mark_resolved(&self, id: i64) -> Result<(), Error> {
        sqlx::query("UPDATE failed_compensations SET status = 'RESOLVED' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        tracing::info!(failed_compensation_id = id, "Compensation failure resolved");
        Ok(())
    }
}

#[async_trait]
impl CompensationLog for PgFailedCompensationStore {
    async fn record(&self, failure: &CompensationFailure) -> Result<i64, Error> {
        #[allow(clippy::cast_possible_wrap)]
        let row = sqlx::query(
            r"
            INSERT INTO failed_compensations
                (order_id, user_id, step_name, step_order, error_message,
                 error_details, context_snapshot)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            ",
        )
        .bind(failure.order_id.map(|id| id.get()))
        .bind(failure.user_id.get())
        .bind(failure.step_name)
        .bind(failure.step_order as i32)
        .bind(failure.error.to_string())
        .bind(format!("{:?}", failure.error))
        .bind(&failure.context_snapshot)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let id: i64 = row.get("id");
        tracing::warn!(
            failed_compensation_id = id,
            order_id = failure.order_id.map(|o| o.get()),
            step_name = failure.step_name,
            error = %failure.error,
            "Compensation failure recorded"
        );
        metrics::counter!("saga.compensation_recorded").increment(1);
        Ok(id)
    }
}

fn row_to_failed(row: &sqlx::postgres::PgRow) -> Result<FailedCompensation, Error> {
    let status: String = row.get("status");
    let order_id: Option<i64> = row.get("order_id");
    let step_order: i32 = row.get("step_order");
    Ok(FailedCompensation {
        id: row.get("id"),
        order_id: order_id.map(OrderId::new),
        user_id: UserId::new(row.get("user_id")),
        step_name: row.get("step_name"),
        step_order: u32::try_from(step_order).unwrap_or_default(),
        error_message: row.get("error_message"),
        error_details: row.get("error_details"),
        failed_at: row.get("failed_at"),
        retry_count: row.get("retry_count"),
        status: CompensationStatus::parse(&status)?,
        context_snapshot: row.get("context_snapshot"),
    })
}
