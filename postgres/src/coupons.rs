//! Coupon store. Issuance serializes on the row lock taken by
//! [`PgCouponStore::find_by_id_for_update`]; the decrement deactivates the
//! coupon in the same row update when the last unit goes.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Row};

use orderflow_core::error::Error;
use orderflow_core::types::{Coupon, CouponId, DiscountType, Money};

use crate::db_err;

/// Row-locked and versioned access to coupon rows.
#[derive(Clone)]
pub struct PgCouponStore {
    pool: PgPool,
}

impl PgCouponStore {
    /// Create a store over the given pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Whether a coupon row exists. The enqueue fast path consults this via
    /// a read-through cache.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] on store failure.
    pub async fn exists(&self, coupon_id: CouponId) -> Result<bool, Error> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT coupon_id FROM coupons WHERE coupon_id = $1")
                .bind(coupon_id.get())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(row.is_some())
    }

    /// Read a coupon without locking.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CouponNotFound`] if no row exists, or
    /// [`Error::Database`] on store failure.
    pub async fn find_by_id(&self, coupon_id: CouponId) -> Result<Coupon, Error> {
        let row = sqlx::query(COUPON_SELECT)
            .bind(coupon_id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(|r| row_to_coupon(&r))
            .transpose()?
            .ok_or(Error::CouponNotFound(coupon_id))
    }

    /// Read a coupon holding a row-level exclusive lock until the enclosing
    /// transaction ends. This lock is the sole serialization point for a
    /// coupon's `remaining_qty`; no KV lock is involved.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CouponNotFound`] if no row exists, or
    /// [`Error::Database`] on store failure.
    pub async fn find_by_id_for_update(
        &self,
        conn: &mut PgConnection,
        coupon_id: CouponId,
    ) -> Result<Coupon, Error> {
        let row = sqlx::query(
            r"
            SELECT coupon_id, name, discount_type, discount_amount, discount_rate,
                   total_qty, remaining_qty, valid_from, valid_until, is_active, version
            FROM coupons
            WHERE coupon_id = $1
            FOR UPDATE
            ",
        )
        .bind(coupon_id.get())
        .fetch_optional(conn)
        .await
        .map_err(db_err)?;

        row.map(|r| row_to_coupon(&r))
            .transpose()?
            .ok_or(Error::CouponNotFound(coupon_id))
    }

    /// Take one unit off `remaining_qty`, deactivating the coupon in the same
    /// update when the count reaches zero, and bump the version.
    ///
    /// # Errors
    ///
    /// Returns [`Error::VersionConflict`] if `expected_version` no longer
    /// matches or the row ran dry between read and write, or
    /// [`Error::Database`] on store failure.
    pub async fn decrement_remaining(
        &self,
        conn: &mut PgConnection,
        coupon_id: CouponId,
        expected_version: i64,
    ) -> Result<(), Error> {
        let result = sqlx::query(
            r"
            UPDATE coupons
            SET remaining_qty = remaining_qty - 1,
                is_active = is_active AND remaining_qty - 1 > 0,
                version = version + 1
            WHERE coupon_id = $1 AND version = $2 AND remaining_qty > 0
            ",
        )
        .bind(coupon_id.get())
        .bind(expected_version)
        .execute(conn)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(Error::VersionConflict { entity: "coupons", id: coupon_id.get() });
        }

        Ok(())
    }
}

const COUPON_SELECT: &str = r"
    SELECT coupon_id, name, discount_type, discount_amount, discount_rate,
           total_qty, remaining_qty, valid_from, valid_until, is_active, version
    FROM coupons
    WHERE coupon_id = $1
";

fn row_to_coupon(row: &sqlx::postgres::PgRow) -> Result<Coupon, Error> {
    let discount_type: String = row.get("discount_type");
    let valid_from: DateTime<Utc> = row.get("valid_from");
    let valid_until: DateTime<Utc> = row.get("valid_until");
    Ok(Coupon {
        coupon_id: CouponId::new(row.get("coupon_id")),
        name: row.get("name"),
        discount_type: DiscountType::parse(&discount_type)?,
        discount_amount: Money::from_minor(row.get("discount_amount")),
        discount_rate: row.get("discount_rate"),
        total_qty: row.get("total_qty"),
        remaining_qty: row.get("remaining_qty"),
        valid_from,
        valid_until,
        is_active: row.get("is_active"),
        version: row.get("version"),
    })
}
