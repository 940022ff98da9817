//! User wallet store.

use sqlx::{PgConnection, PgPool, Row};

use orderflow_core::error::Error;
use orderflow_core::types::{Money, User, UserId};

use crate::db_err;

/// Row-locked and versioned access to user wallets.
#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    /// Create a store over the given pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Read a user without locking.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UserNotFound`] if no row exists, or
    /// [`Error::Database`] on store failure.
    pub async fn find_by_id(&self, user_id: UserId) -> Result<User, Error> {
        let row = sqlx::query(
            r"
            SELECT user_id, balance, version
            FROM users
            WHERE user_id = $1
            ",
        )
        .bind(user_id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|r| row_to_user(&r)).ok_or(Error::UserNotFound(user_id))
    }

    /// Read a user holding a row-level exclusive lock until the enclosing
    /// transaction ends. The caller must also hold the user's KV lock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UserNotFound`] if no row exists, or
    /// [`Error::Database`] on store failure.
    pub async fn find_by_id_for_update(
        &self,
        conn: &mut PgConnection,
        user_id: UserId,
    ) -> Result<User, Error> {
        let row = sqlx::query(
            r"
            SELECT user_id, balance, version
            FROM users
            WHERE user_id = $1
            FOR UPDATE
            ",
        )
        .bind(user_id.get())
        .fetch_optional(conn)
        .await
        .map_err(db_err)?;

        row.map(|r| row_to_user(&r)).ok_or(Error::UserNotFound(user_id))
    }

    /// Write a new balance, bumping the version.
    ///
    /// # Errors
    ///
    /// Returns [`Error::VersionConflict`] if `expected_version` no longer
    /// matches, or [`Error::Database`] on store failure.
    pub async fn update_balance(
        &self,
        conn: &mut PgConnection,
        user_id: UserId,
        balance: Money,
        expected_version: i64,
    ) -> Result<(), Error> {
        let result = sqlx::query(
            r"
            UPDATE users
            SET balance = $1, version = version + 1, updated_at = now()
            WHERE user_id = $2 AND version = $3
            ",
        )
        .bind(balance.minor())
        .bind(user_id.get())
        .bind(expected_version)
        .execute(conn)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(Error::VersionConflict { entity: "users", id: user_id.get() });
        }

        tracing::debug!(user_id = user_id.get(), balance = balance.minor(), "Balance updated");
        Ok(())
    }
}

fn row_to_user(row: &sqlx::postgres::PgRow) -> User {
    User {
        user_id: UserId::new(row.get("user_id")),
        balance: Money::from_minor(row.get("balance")),
        version: row.get("version"),
    }
}
