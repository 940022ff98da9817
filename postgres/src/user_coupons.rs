//! User-coupon store. The `(user_id, coupon_id)` unique constraint is the
//! at-most-once guarantee of the issuance pipeline; a violation surfaces as
//! [`Error::CouponAlreadyIssued`] rather than a raw database error.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Row};

use orderflow_core::error::Error;
use orderflow_core::types::{CouponId, UserCoupon, UserCouponId, UserCouponStatus, UserId};

use crate::{db_err, is_unique_violation};

/// Row-locked access to issued user coupons.
#[derive(Clone)]
pub struct PgUserCouponStore {
    pool: PgPool,
}

impl PgUserCouponStore {
    /// Create a store over the given pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Look up the grant for a `(user, coupon)` pair, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] on store failure.
    pub async fn find_by_user_and_coupon(
        &self,
        conn: &mut PgConnection,
        user_id: UserId,
        coupon_id: CouponId,
    ) -> Result<Option<UserCoupon>, Error> {
        let row = sqlx::query(
            r"
            SELECT user_coupon_id, user_id, coupon_id, status, issued_at, used_at
            FROM user_coupons
            WHERE user_id = $1 AND coupon_id = $2
            ",
        )
        .bind(user_id.get())
        .bind(coupon_id.get())
        .fetch_optional(conn)
        .await
        .map_err(db_err)?;

        row.map(|r| row_to_user_coupon(&r)).transpose()
    }

    /// Read the grant for a `(user, coupon)` pair holding a row-level
    /// exclusive lock until the enclosing transaction ends.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UserCouponNotFound`] if no row exists, or
    /// [`Error::Database`] on store failure.
    pub async fn find_by_user_and_coupon_for_update(
        &self,
        conn: &mut PgConnection,
        user_id: UserId,
        coupon_id: CouponId,
    ) -> Result<UserCoupon, Error> {
        let row = sqlx::query(
            r"
            SELECT user_coupon_id, user_id, coupon_id, status, issued_at, used_at
            FROM user_coupons
            WHERE user_id = $1 AND coupon_id = $2
            FOR UPDATE
            ",
        )
        .bind(user_id.get())
        .bind(coupon_id.get())
        .fetch_optional(conn)
        .await
        .map_err(db_err)?;

        row.map(|r| row_to_user_coupon(&r))
            .transpose()?
            .ok_or(Error::UserCouponNotFound { user_id, coupon_id })
    }

    /// Insert a fresh UNUSED grant.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CouponAlreadyIssued`] when the pair already holds a
    /// grant, or [`Error::Database`] on store failure.
    pub async fn insert(
        &self,
        conn: &mut PgConnection,
        user_id: UserId,
        coupon_id: CouponId,
        issued_at: DateTime<Utc>,
    ) -> Result<UserCoupon, Error> {
        let row = sqlx::query(
            r"
            INSERT INTO user_coupons (user_id, coupon_id, status, issued_at)
            VALUES ($1, $2, 'UNUSED', $3)
            RETURNING user_coupon_id
            ",
        )
        .bind(user_id.get())
        .bind(coupon_id.get())
        .bind(issued_at)
        .fetch_one(conn)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::CouponAlreadyIssued { user_id, coupon_id }
            } else {
                db_err(e)
            }
        })?;

        Ok(UserCoupon {
            user_coupon_id: UserCouponId::new(row.get("user_coupon_id")),
            user_id,
            coupon_id,
            status: UserCouponStatus::Unused,
            issued_at,
            used_at: None,
        })
    }

    /// Transition a grant to a new status, setting or clearing `used_at`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] on store failure.
    pub async fn update_status(
        &self,
        conn: &mut PgConnection,
        user_coupon_id: UserCouponId,
        status: UserCouponStatus,
        used_at: Option<DateTime<Utc>>,
    ) -> Result<(), Error> {
        sqlx::query(
            r"
            UPDATE user_coupons
            SET status = $1, used_at = $2
            WHERE user_coupon_id = $3
            ",
        )
        .bind(status.as_str())
        .bind(used_at)
        .bind(user_coupon_id.get())
        .execute(conn)
        .await
        .map_err(db_err)?;

        tracing::debug!(
            user_coupon_id = user_coupon_id.get(),
            status = status.as_str(),
            "User coupon status updated"
        );
        Ok(())
    }

    /// Count grants for a coupon in the given statuses. Used by invariant
    /// checks and reporting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] on store failure.
    pub async fn count_by_coupon(
        &self,
        coupon_id: CouponId,
        statuses: &[UserCouponStatus],
    ) -> Result<i64, Error> {
        let status_strings: Vec<String> = statuses
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();
        let (count,): (i64,) = sqlx::query_as(
            r"
            SELECT COUNT(*)
            FROM user_coupons
            WHERE coupon_id = $1 AND status = ANY($2)
            ",
        )
        .bind(coupon_id.get())
        .bind(&status_strings[..])
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(count)
    }
}

fn row_to_user_coupon(row: &sqlx::postgres::PgRow) -> Result<UserCoupon, Error> {
    let status: String = row.get("status");
    Ok(UserCoupon {
        user_coupon_id: UserCouponId::new(row.get("user_coupon_id")),
        user_id: UserId::new(row.get("user_id")),
        coupon_id: CouponId::new(row.get("coupon_id")),
        status: UserCouponStatus::parse(&status)?,
        issued_at: row.get("issued_at"),
        used_at: row.get("used_at"),
    })
}
