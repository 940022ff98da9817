//! Product and product-option store. The core only mutates option stock;
//! product rows are read for snapshots.

use sqlx::{PgConnection, PgPool, Row};

use orderflow_core::error::Error;
use orderflow_core::types::{Money, OptionId, Product, ProductId, ProductOption};

use crate::db_err;

/// Row-locked and versioned access to product options.
#[derive(Clone)]
pub struct PgProductStore {
    pool: PgPool,
}

impl PgProductStore {
    /// Create a store over the given pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Read a product without locking.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProductNotFound`] if no row exists, or
    /// [`Error::Database`] on store failure.
    pub async fn find_product(&self, product_id: ProductId) -> Result<Product, Error> {
        let row = sqlx::query(
            r"
            SELECT product_id, name, price
            FROM products
            WHERE product_id = $1
            ",
        )
        .bind(product_id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|r| Product {
            product_id: ProductId::new(r.get("product_id")),
            name: r.get("name"),
            price: Money::from_minor(r.get("price")),
        })
        .ok_or(Error::ProductNotFound(product_id))
    }

    /// Read an option without locking.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OptionNotFound`] if no row exists, or
    /// [`Error::Database`] on store failure.
    pub async fn find_option(&self, option_id: OptionId) -> Result<ProductOption, Error> {
        let row = sqlx::query(OPTION_SELECT)
            .bind(option_id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(|r| row_to_option(&r)).ok_or(Error::OptionNotFound(option_id))
    }

    /// Read an option holding a row-level exclusive lock until the enclosing
    /// transaction ends. The caller must also hold the option's KV lock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OptionNotFound`] if no row exists, or
    /// [`Error::Database`] on store failure.
    pub async fn find_option_for_update(
        &self,
        conn: &mut PgConnection,
        option_id: OptionId,
    ) -> Result<ProductOption, Error> {
        let row = sqlx::query(
            r"
            SELECT option_id, product_id, option_name, stock, version
            FROM product_options
            WHERE option_id = $1
            FOR UPDATE
            ",
        )
        .bind(option_id.get())
        .fetch_optional(conn)
        .await
        .map_err(db_err)?;

        row.map(|r| row_to_option(&r)).ok_or(Error::OptionNotFound(option_id))
    }

    /// Write a new stock level, bumping the version. The schema's
    /// `stock >= 0` check is the last line of defence; callers verify
    /// availability under the row lock first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::VersionConflict`] if `expected_version` no longer
    /// matches, or [`Error::Database`] on store failure.
    pub async fn update_stock(
        &self,
        conn: &mut PgConnection,
        option_id: OptionId,
        stock: i32,
        expected_version: i64,
    ) -> Result<(), Error> {
        let result = sqlx::query(
            r"
            UPDATE product_options
            SET stock = $1, version = version + 1
            WHERE option_id = $2 AND version = $3
            ",
        )
        .bind(stock)
        .bind(option_id.get())
        .bind(expected_version)
        .execute(conn)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(Error::VersionConflict {
                entity: "product_options",
                id: option_id.get(),
            });
        }

        tracing::debug!(option_id = option_id.get(), stock = stock, "Stock updated");
        Ok(())
    }
}

const OPTION_SELECT: &str = r"
    SELECT option_id, product_id, option_name, stock, version
    FROM product_options
    WHERE option_id = $1
";

fn row_to_option(row: &sqlx::postgres::PgRow) -> ProductOption {
    ProductOption {
        option_id: OptionId::new(row.get("option_id")),
        product_id: ProductId::new(row.get("product_id")),
        option_name: row.get("option_name"),
        stock: row.get("stock"),
        version: row.get("version"),
    }
}
