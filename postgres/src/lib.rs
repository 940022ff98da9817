//! `PostgreSQL` stores for the Orderflow transactional core.
//!
//! One store struct per aggregate, all sharing a [`PgPool`]. Methods that
//! participate in a row-locked unit of work take `&mut PgConnection` so the
//! caller composes them inside a single `pool.begin()` transaction; each saga
//! step and each issuance attempt opens its own transaction and never joins
//! an outer one. Convenience reads outside any transaction go through the
//! pool directly.
//!
//! # Example
//!
//! ```ignore
//! let stores = PgStores::connect(&config.postgres).await?;
//! let mut tx = stores.pool().begin().await?;
//! let user = stores.users.find_by_id_for_update(&mut tx, user_id).await?;
//! stores.users.update_balance(&mut tx, user_id, new_balance, user.version).await?;
//! tx.commit().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

use orderflow_core::config::PostgresConfig;
use orderflow_core::error::Error;

mod coupons;
mod dead_letters;
mod failed_compensations;
mod orders;
mod outbox;
mod platform_events;
mod products;
mod user_coupons;
mod users;

pub use coupons::PgCouponStore;
pub use dead_letters::PgCouponDeadLetterStore;
pub use failed_compensations::PgFailedCompensationStore;
pub use orders::PgOrderStore;
pub use outbox::PgOutboxStore;
pub use platform_events::PgPlatformEventStore;
pub use products::PgProductStore;
pub use user_coupons::PgUserCouponStore;
pub use users::PgUserStore;

/// The schema bootstrap script, applied by deployments and test harnesses.
pub const SCHEMA: &str = include_str!("../migrations/001_init.sql");

/// Map a sqlx error into the domain's transient database error.
pub(crate) fn db_err(e: sqlx::Error) -> Error {
    Error::Database(e.to_string())
}

/// Whether a sqlx error is a Postgres unique-constraint violation.
pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

/// All stores bundled over one connection pool.
#[derive(Clone)]
pub struct PgStores {
    pool: PgPool,
    /// User wallet rows.
    pub users: PgUserStore,
    /// Products and their options.
    pub products: PgProductStore,
    /// Coupon rows.
    pub coupons: PgCouponStore,
    /// Issued user coupons.
    pub user_coupons: PgUserCouponStore,
    /// Orders and order items.
    pub orders: PgOrderStore,
    /// Transactional outbox.
    pub outbox: PgOutboxStore,
    /// Saga compensation dead letters.
    pub failed_compensations: PgFailedCompensationStore,
    /// Coupon request dead letters.
    pub dead_letters: PgCouponDeadLetterStore,
    /// Consumer-side idempotency table.
    pub platform_events: PgPlatformEventStore,
}

impl PgStores {
    /// Connect a pool and build the store bundle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] if the pool cannot be established.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout))
            .connect(&config.url)
            .await
            .map_err(db_err)?;
        Ok(Self::from_pool(pool))
    }

    /// Build the store bundle over an existing pool.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            users: PgUserStore::new(pool.clone()),
            products: PgProductStore::new(pool.clone()),
            coupons: PgCouponStore::new(pool.clone()),
            user_coupons: PgUserCouponStore::new(pool.clone()),
            orders: PgOrderStore::new(pool.clone()),
            outbox: PgOutboxStore::new(pool.clone()),
            failed_compensations: PgFailedCompensationStore::new(pool.clone()),
            dead_letters: PgCouponDeadLetterStore::new(pool.clone()),
            platform_events: PgPlatformEventStore::new(pool.clone()),
            pool,
        }
    }

    /// Apply the schema bootstrap script.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] if any statement fails.
    pub async fn migrate(&self) -> Result<(), Error> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await.map_err(db_err)?;
        Ok(())
    }

    /// The underlying pool, for opening step transactions.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}
