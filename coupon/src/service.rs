//! The transactional issuance core.
//!
//! One attempt is one transaction: a pessimistic lock on the coupon row
//! (the serialization point for its `remaining_qty` — no KV lock, the
//! partition already serialized the contention), the validity checks, the
//! `(user, coupon)` uniqueness check, the grant insert, the decrement that
//! deactivates the coupon when the last unit goes, and the COUPON_ISSUED
//! outbox row, all committed together.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use orderflow_core::clock::Clock;
use orderflow_core::error::Error;
use orderflow_core::outbox::DispatcherHandle;
use orderflow_core::pipeline::CouponIssuer;
use orderflow_core::types::{CouponId, MessageType, UserCouponView, UserId};
use orderflow_postgres::PgStores;

use crate::db;

/// Postgres-backed [`CouponIssuer`], shared by the queue workers and the
/// synchronous API.
pub struct CouponIssueService {
    stores: Arc<PgStores>,
    clock: Arc<dyn Clock>,
    dispatcher: DispatcherHandle,
}

impl CouponIssueService {
    /// Create the service. `dispatcher` is nudged after each issuance commit
    /// so the COUPON_ISSUED outbox row publishes promptly.
    #[must_use]
    pub fn new(stores: Arc<PgStores>, clock: Arc<dyn Clock>, dispatcher: DispatcherHandle) -> Self {
        Self { stores, clock, dispatcher }
    }

    /// Synchronous issuance sharing the same transactional core. For tests
    /// and low-volume callers; spike traffic goes through the queue.
    ///
    /// # Errors
    ///
    /// Same contract as [`CouponIssuer::issue`].
    pub async fn issue_sync(
        &self,
        user_id: UserId,
        coupon_id: CouponId,
    ) -> Result<UserCouponView, Error> {
        self.issue_one(user_id, coupon_id).await
    }

    async fn issue_one(&self, user_id: UserId, coupon_id: CouponId) -> Result<UserCouponView, Error> {
        let now = self.clock.now();
        let mut tx = self.stores.pool().begin().await.map_err(db)?;

        let coupon = self
            .stores
            .coupons
            .find_by_id_for_update(&mut tx, coupon_id)
            .await?;
        if !coupon.is_active {
            return Err(Error::CouponInactive(coupon_id));
        }
        if !coupon.is_within_window(now) {
            return Err(Error::CouponExpired(coupon_id));
        }
        if coupon.remaining_qty <= 0 {
            return Err(Error::CouponExhausted(coupon_id));
        }
        if self
            .stores
            .user_coupons
            .find_by_user_and_coupon(&mut tx, user_id, coupon_id)
            .await?
            .is_some()
        {
            return Err(Error::CouponAlreadyIssued { user_id, coupon_id });
        }

        let grant = self
            .stores
            .user_coupons
            .insert(&mut tx, user_id, coupon_id, now)
            .await?;
        self.stores
            .coupons
            .decrement_remaining(&mut tx, coupon_id, coupon.version)
            .await?;

        let payload = json!({
            "user_coupon_id": grant.user_coupon_id,
            "user_id": user_id,
            "coupon_id": coupon_id,
            "issued_at": now.to_rfc3339(),
        });
        self.stores
            .outbox
            .save(&mut tx, None, user_id, MessageType::CouponIssued, &payload)
            .await?;

        tx.commit().await.map_err(db)?;
        self.dispatcher.wake();

        metrics::counter!("coupon.issued").increment(1);
        tracing::info!(
            user_id = user_id.get(),
            coupon_id = coupon_id.get(),
            user_coupon_id = grant.user_coupon_id.get(),
            remaining = coupon.remaining_qty - 1,
            "Coupon issued"
        );

        Ok(UserCouponView::from(&grant))
    }
}

#[async_trait]
impl CouponIssuer for CouponIssueService {
    async fn issue(&self, user_id: UserId, coupon_id: CouponId) -> Result<UserCouponView, Error> {
        self.issue_one(user_id, coupon_id).await
    }
}
