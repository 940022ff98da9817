//! Dead letters for coupon requests that exhausted their retry budget.
//!
//! Enables incident investigation and manual reprocessing; the worker writes
//! a row here at the same moment it writes the request's terminal FAILED
//! status.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use orderflow_core::error::Error;
use orderflow_core::pipeline::DeadLetterSink;
use orderflow_core::types::{CouponId, CouponRequest, RequestId, UserId};

use crate::db_err;

/// A dead coupon request awaiting inspection.
#[derive(Debug, Clone)]
pub struct CouponDeadLetter {
    /// Row id.
    pub id: i64,
    /// The dead request's id.
    pub request_id: RequestId,
    /// Requesting user.
    pub user_id: UserId,
    /// Requested coupon.
    pub coupon_id: CouponId,
    /// The error that killed the request.
    pub error_message: String,
    /// Retries consumed before death.
    pub retry_count: i32,
    /// When the request originally entered the queue.
    pub enqueued_at: chrono::DateTime<chrono::Utc>,
    /// When the request was dead-lettered.
    pub dead_lettered_at: chrono::DateTime<chrono::Utc>,
}

/// Postgres-backed coupon dead-letter store.
#[derive(Clone)]
pub struct PgCouponDeadLetterStore {
    pool: PgPool,
}

impl PgCouponDeadLetterStore {
    /// Create a store over the given pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// List unresolved dead letters, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] on store failure.
    pub async fn list_pending(&self, limit: usize) -> Result<Vec<CouponDeadLetter>, Error> {
        #[allow(clippy::cast_possible_wrap)]
        let rows = sqlx::query(
            r"
            SELECT id, request_id, user_id, coupon_id, error_message, retry_count,
                   enqueued_at, dead_lettered_at
            FROM coupon_dead_letters
            WHERE status = 'PENDING'
            ORDER BY dead_lettered_at
            LIMIT $1
            ",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.iter().map(row_to_dead_letter).collect())
    }

    /// Count unresolved dead letters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] on store failure.
    pub async fn count_pending(&self) -> Result<i64, Error> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM coupon_dead_letters WHERE status = 'PENDING'",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(count)
    }

    /// Mark a dead letter resolved, with optional notes on what was done.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] on store failure.
    pub async fn mark_resolved(&self, id: i64, notes: Option<&str>) -> Result<(), Error> {
        sqlx::query(
            r"
            UPDATE coupon_dead_letters
            SET status = 'RESOLVED', resolution_notes = $1
            WHERE id = $2
            ",
        )
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        tracing::info!(dead_letter_id = id, "Coupon dead letter resolved");
        Ok(())
    }
}

#[async_trait]
impl DeadLetterSink for PgCouponDeadLetterStore {
    async fn push(&self, request: &CouponRequest, error: &str) -> Result<i64, Error> {
        #[allow(clippy::cast_possible_wrap)]
        let row = sqlx::query(
            r"
            INSERT INTO coupon_dead_letters
                (request_id, user_id, coupon_id, error_message, retry_count, enqueued_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            ",
        )
        .bind(request.request_id.as_uuid())
        .bind(request.user_id.get())
        .bind(request.coupon_id.get())
        .bind(error)
        .bind(request.retry_count as i32)
        .bind(request.enqueued_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let id: i64 = row.get("id");
        tracing::warn!(
            dead_letter_id = id,
            request_id = %request.request_id,
            coupon_id = request.coupon_id.get(),
            error = error,
            retry_count = request.retry_count,
            "Coupon request dead-lettered"
        );
        metrics::counter!("coupon.dead_lettered").increment(1);
        Ok(id)
    }
}

fn row_to_dead_letter(row: &sqlx::postgres::PgRow) -> CouponDeadLetter {
    CouponDeadLetter {
        id: row.get("id"),
        request_id: RequestId::from_uuid(row.get("request_id")),
        user_id: UserId::new(row.get("user_id")),
        coupon_id: CouponId::new(row.get("coupon_id")),
        error_message: row.get("error_message"),
        retry_count: row.get("retry_count"),
        enqueued_at: row.get("enqueued_at"),
        dead_lettered_at: row.get("dead_lettered_at"),
    }
}
