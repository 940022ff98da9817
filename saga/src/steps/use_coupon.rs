//! Step 3: consume the user's coupon. Skipped when the order carries none.

use async_trait::async_trait;
use std::sync::Arc;

use orderflow_core::clock::Clock;
use orderflow_core::error::Error;
use orderflow_core::types::UserCouponStatus;
use orderflow_postgres::PgStores;

use crate::step::{OrderSnapshot, SagaStep};
use crate::steps::db;

/// Transitions the `(user, coupon)` grant from UNUSED to USED under its row
/// lock. No KV lock: the unique row is the serialization point.
pub struct UseCouponStep {
    stores: Arc<PgStores>,
    clock: Arc<dyn Clock>,
}

impl UseCouponStep {
    /// Stable step name, as recorded in execution trails and failure records.
    pub const NAME: &'static str = "UseCouponStep";

    /// Create the step.
    #[must_use]
    pub fn new(stores: Arc<PgStores>, clock: Arc<dyn Clock>) -> Self {
        Self { stores, clock }
    }
}

#[async_trait]
impl SagaStep for UseCouponStep {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn order(&self) -> u32 {
        3
    }

    async fn execute(&self, snapshot: &mut OrderSnapshot) -> Result<(), Error> {
        let Some(coupon_id) = snapshot.coupon_id else {
            return Ok(());
        };

        let mut tx = self.stores.pool().begin().await.map_err(db)?;
        let grant = self
            .stores
            .user_coupons
            .find_by_user_and_coupon_for_update(&mut tx, snapshot.user_id, coupon_id)
            .await?;
        if grant.status != UserCouponStatus::Unused {
            return Err(Error::CouponNotUsable {
                user_id: snapshot.user_id,
                coupon_id,
                status: grant.status.as_str().to_string(),
            });
        }
        self.stores
            .user_coupons
            .update_status(
                &mut tx,
                grant.user_coupon_id,
                UserCouponStatus::Used,
                Some(self.clock.now()),
            )
            .await?;
        tx.commit().await.map_err(db)?;
        Ok(())
    }

    async fn compensate(&self, snapshot: &OrderSnapshot) -> Result<(), Error> {
        let Some(coupon_id) = snapshot.coupon_id else {
            return Ok(());
        };

        let mut tx = self.stores.pool().begin().await.map_err(db)?;
        let grant = self
            .stores
            .user_coupons
            .find_by_user_and_coupon_for_update(&mut tx, snapshot.user_id, coupon_id)
            .await?;
        // Already UNUSED means a replayed compensation; converge silently.
        if grant.status == UserCouponStatus::Used {
            self.stores
                .user_coupons
                .update_status(&mut tx, grant.user_coupon_id, UserCouponStatus::Unused, None)
                .await?;
        }
        tx.commit().await.map_err(db)?;
        Ok(())
    }
}
