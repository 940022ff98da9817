//! Transactional outbox store.
//!
//! [`PgOutboxStore::save`] runs inside the caller's transaction so the
//! message commits or rolls back with the business rows it describes. The
//! dispatcher side implements the [`Outbox`] state machine; the claim uses
//! `FOR UPDATE SKIP LOCKED` so two dispatcher instances never take the same
//! row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Row};

use orderflow_core::error::Error;
use orderflow_core::outbox::Outbox;
use orderflow_core::types::{
    MessageId, MessageType, OrderId, OutboxMessage, OutboxStatus, UserId,
};

use crate::db_err;

/// Postgres-backed transactional outbox.
#[derive(Clone)]
pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    /// Create a store over the given pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a PENDING message inside the caller's transaction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] on store failure.
    pub async fn save(
        &self,
        conn: &mut PgConnection,
        order_id: Option<OrderId>,
        user_id: UserId,
        message_type: MessageType,
        payload: &serde_json::Value,
    ) -> Result<MessageId, Error> {
        let row = sqlx::query(
            r"
            INSERT INTO outbox (order_id, user_id, message_type, payload, status)
            VALUES ($1, $2, $3, $4, 'PENDING')
            RETURNING message_id
            ",
        )
        .bind(order_id.map(|id| id.get()))
        .bind(user_id.get())
        .bind(message_type.as_str())
        .bind(payload)
        .fetch_one(conn)
        .await
        .map_err(db_err)?;

        let id = MessageId::new(row.get("message_id"));
        tracing::debug!(
            message_id = id.get(),
            message_type = message_type.as_str(),
            "Outbox message saved"
        );
        Ok(id)
    }

    /// All messages for an order, oldest first. Used by tests and invariant
    /// checks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] on store failure.
    pub async fn find_by_order(&self, order_id: OrderId) -> Result<Vec<OutboxMessage>, Error> {
        let rows = sqlx::query(
            r"
            SELECT message_id, order_id, user_id, message_type, payload, status,
                   retry_count, last_attempt, sent_at, created_at
            FROM outbox
            WHERE order_id = $1
            ORDER BY created_at
            ",
        )
        .bind(order_id.get())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(row_to_message).collect()
    }

    async fn set_status(
        &self,
        id: MessageId,
        from: OutboxStatus,
        to: OutboxStatus,
        set_sent_at: bool,
    ) -> Result<(), Error> {
        let sql = if set_sent_at {
            r"UPDATE outbox SET status = $1, sent_at = now() WHERE message_id = $2 AND status = $3"
        } else {
            r"UPDATE outbox SET status = $1 WHERE message_id = $2 AND status = $3"
        };
        let result = sqlx::query(sql)
            .bind(to.as_str())
            .bind(id.get())
            .bind(from.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            // The row moved under us; dispatchers tolerate this and move on.
            tracing::warn!(
                message_id = id.get(),
                from = from.as_str(),
                to = to.as_str(),
                "Outbox transition skipped: row not in expected state"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl Outbox for PgOutboxStore {
    async fn claim_pending(&self, batch: usize) -> Result<Vec<OutboxMessage>, Error> {
        #[allow(clippy::cast_possible_wrap)]
        let rows = sqlx::query(
            r"
            UPDATE outbox
            SET status = 'PUBLISHING', last_attempt = now()
            WHERE message_id IN (
                SELECT message_id FROM outbox
                WHERE status = 'PENDING'
                ORDER BY created_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING message_id, order_id, user_id, message_type, payload, status,
                      retry_count, last_attempt, sent_at, created_at
            ",
        )
        .bind(batch as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(row_to_message).collect()
    }

    async fn mark_published(&self, id: MessageId) -> Result<(), Error> {
        self.set_status(id, OutboxStatus::Publishing, OutboxStatus::Published, true)
            .await?;
        metrics::counter!("outbox.published").increment(1);
        Ok(())
    }

    async fn release_for_retry(&self, id: MessageId) -> Result<(), Error> {
        let result = sqlx::query(
            r"
            UPDATE outbox
            SET status = 'PENDING', retry_count = retry_count + 1
            WHERE message_id = $1 AND status = 'PUBLISHING'
            ",
        )
        .bind(id.get())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            tracing::warn!(message_id = id.get(), "Outbox retry release skipped");
        }
        Ok(())
    }

    async fn mark_abandoned(&self, id: MessageId) -> Result<(), Error> {
        self.set_status(id, OutboxStatus::Publishing, OutboxStatus::Abandoned, false)
            .await?;
        metrics::counter!("outbox.abandoned").increment(1);
        tracing::warn!(message_id = id.get(), "Outbox message abandoned after retry budget");
        Ok(())
    }

    async fn mark_failed(&self, id: MessageId) -> Result<(), Error> {
        self.set_status(id, OutboxStatus::Publishing, OutboxStatus::Failed, false)
            .await?;
        tracing::error!(message_id = id.get(), "Outbox message failed (non-retryable)");
        Ok(())
    }
}

fn row_to_message(row: &sqlx::postgres::PgRow) -> Result<OutboxMessage, Error> {
    let message_type: String = row.get("message_type");
    let status: String = row.get("status");
    let order_id: Option<i64> = row.get("order_id");
    let last_attempt: Option<DateTime<Utc>> = row.get("last_attempt");
    let sent_at: Option<DateTime<Utc>> = row.get("sent_at");
    Ok(OutboxMessage {
        message_id: MessageId::new(row.get("message_id")),
        order_id: order_id.map(OrderId::new),
        user_id: UserId::new(row.get("user_id")),
        message_type: MessageType::parse(&message_type)?,
        payload: row.get("payload"),
        status: OutboxStatus::parse(&status)?,
        retry_count: row.get("retry_count"),
        last_attempt,
        sent_at,
        created_at: row.get("created_at"),
    })
}
