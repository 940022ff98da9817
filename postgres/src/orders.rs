//! Order and order-item store.
//!
//! Order rows are inserted already COMPLETED by the saga's final step, in the
//! same transaction as their items and outbox message. Cancellation is the
//! only later mutation.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Row};

use orderflow_core::error::Error;
use orderflow_core::types::{
    CouponId, Money, OptionId, Order, OrderId, OrderItem, OrderItemId, OrderLine, OrderStatus,
    ProductId, UserId,
};

use crate::db_err;

/// Row-locked access to orders and their items.
#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    /// Create a store over the given pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a COMPLETED order row and return its id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] on store failure.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_order(
        &self,
        conn: &mut PgConnection,
        user_id: UserId,
        coupon_id: Option<CouponId>,
        subtotal: Money,
        coupon_discount: Money,
        final_amount: Money,
        created_at: DateTime<Utc>,
    ) -> Result<OrderId, Error> {
        let row = sqlx::query(
            r"
            INSERT INTO orders
                (user_id, status, coupon_id, subtotal, coupon_discount, final_amount, created_at)
            VALUES ($1, 'COMPLETED', $2, $3, $4, $5, $6)
            RETURNING order_id
            ",
        )
        .bind(user_id.get())
        .bind(coupon_id.map(|c| c.get()))
        .bind(subtotal.minor())
        .bind(coupon_discount.minor())
        .bind(final_amount.minor())
        .bind(created_at)
        .fetch_one(conn)
        .await
        .map_err(db_err)?;

        Ok(OrderId::new(row.get("order_id")))
    }

    /// Insert the order's line items.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] on store failure.
    #[allow(clippy::cast_possible_wrap)]
    pub async fn insert_items(
        &self,
        conn: &mut PgConnection,
        order_id: OrderId,
        lines: &[OrderLine],
    ) -> Result<(), Error> {
        for line in lines {
            sqlx::query(
                r"
                INSERT INTO order_items
                    (order_id, product_id, option_id, product_name, option_name,
                     quantity, unit_price, subtotal)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ",
            )
            .bind(order_id.get())
            .bind(line.product_id.get())
            .bind(line.option_id.get())
            .bind(&line.product_name)
            .bind(&line.option_name)
            .bind(line.quantity as i32)
            .bind(line.unit_price.minor())
            .bind(line.subtotal().minor())
            .execute(&mut *conn)
            .await
            .map_err(db_err)?;
        }
        Ok(())
    }

    /// Read an order without locking.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OrderNotFound`] if no row exists, or
    /// [`Error::Database`] on store failure.
    pub async fn find_by_id(&self, order_id: OrderId) -> Result<Order, Error> {
        let row = sqlx::query(ORDER_SELECT)
            .bind(order_id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(|r| row_to_order(&r))
            .transpose()?
            .ok_or(Error::OrderNotFound(order_id))
    }

    /// Read an order holding a row-level exclusive lock until the enclosing
    /// transaction ends. Used by cancellation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OrderNotFound`] if no row exists, or
    /// [`Error::Database`] on store failure.
    pub async fn find_by_id_for_update(
        &self,
        conn: &mut PgConnection,
        order_id: OrderId,
    ) -> Result<Order, Error> {
        let row = sqlx::query(
            r"
            SELECT order_id, user_id, status, coupon_id, subtotal, coupon_discount,
                   final_amount, created_at, cancelled_at
            FROM orders
            WHERE order_id = $1
            FOR UPDATE
            ",
        )
        .bind(order_id.get())
        .fetch_optional(conn)
        .await
        .map_err(db_err)?;

        row.map(|r| row_to_order(&r))
            .transpose()?
            .ok_or(Error::OrderNotFound(order_id))
    }

    /// Read an order's items inside the caller's transaction. Compensations
    /// restore stock from these durable rows, never from memory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] on store failure.
    pub async fn find_items(
        &self,
        conn: &mut PgConnection,
        order_id: OrderId,
    ) -> Result<Vec<OrderItem>, Error> {
        let rows = sqlx::query(
            r"
            SELECT order_item_id, order_id, product_id, option_id, product_name,
                   option_name, quantity, unit_price, subtotal
            FROM order_items
            WHERE order_id = $1
            ORDER BY order_item_id
            ",
        )
        .bind(order_id.get())
        .fetch_all(conn)
        .await
        .map_err(db_err)?;

        Ok(rows.iter().map(row_to_item).collect())
    }

    /// Transition an order to CANCELLED with the given timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] on store failure.
    pub async fn mark_cancelled(
        &self,
        conn: &mut PgConnection,
        order_id: OrderId,
        cancelled_at: DateTime<Utc>,
    ) -> Result<(), Error> {
        sqlx::query(
            r"
            UPDATE orders
            SET status = 'CANCELLED', cancelled_at = $1
            WHERE order_id = $2
            ",
        )
        .bind(cancelled_at)
        .bind(order_id.get())
        .execute(conn)
        .await
        .map_err(db_err)?;

        tracing::info!(order_id = order_id.get(), "Order cancelled");
        Ok(())
    }
}

const ORDER_SELECT: &str = r"
    SELECT order_id, user_id, status, coupon_id, subtotal, coupon_discount,
           final_amount, created_at, cancelled_at
    FROM orders
    WHERE order_id = $1
";

fn row_to_order(row: &sqlx::postgres::PgRow) -> Result<Order, Error> {
    let status: String = row.get("status");
    let coupon_id: Option<i64> = row.get("coupon_id");
    Ok(Order {
        order_id: OrderId::new(row.get("order_id")),
        user_id: UserId::new(row.get("user_id")),
        status: OrderStatus::parse(&status)?,
        coupon_id: coupon_id.map(CouponId::new),
        subtotal: Money::from_minor(row.get("subtotal")),
        coupon_discount: Money::from_minor(row.get("coupon_discount")),
        final_amount: Money::from_minor(row.get("final_amount")),
        created_at: row.get("created_at"),
        cancelled_at: row.get("cancelled_at"),
    })
}

#[allow(clippy::cast_sign_loss)]
fn row_to_item(row: &sqlx::postgres::PgRow) -> OrderItem {
    let quantity: i32 = row.get("quantity");
    OrderItem {
        order_item_id: OrderItemId::new(row.get("order_item_id")),
        order_id: OrderId::new(row.get("order_id")),
        product_id: ProductId::new(row.get("product_id")),
        option_id: OptionId::new(row.get("option_id")),
        product_name: row.get("product_name"),
        option_name: row.get("option_name"),
        quantity: quantity as u32,
        unit_price: Money::from_minor(row.get("unit_price")),
        subtotal: Money::from_minor(row.get("subtotal")),
    }
}
