//! Step 2: debit the user's wallet.

use async_trait::async_trait;
use std::sync::Arc;

use orderflow_core::config::SagaConfig;
use orderflow_core::error::Error;
use orderflow_core::lock::{user_balance_key, with_lock, DistributedLock};
use orderflow_core::types::Money;
use orderflow_postgres::PgStores;

use crate::step::{OrderSnapshot, SagaStep};
use crate::steps::db;

/// Debits `final_amount` from the buyer's wallet under the user's KV lock
/// and a pessimistic row lock.
pub struct DeductBalanceStep {
    stores: Arc<PgStores>,
    locks: Arc<dyn DistributedLock>,
    config: SagaConfig,
}

impl DeductBalanceStep {
    /// Stable step name, as recorded in execution trails and failure records.
    pub const NAME: &'static str = "DeductBalanceStep";

    /// Create the step.
    #[must_use]
    pub fn new(stores: Arc<PgStores>, locks: Arc<dyn DistributedLock>, config: SagaConfig) -> Self {
        Self { stores, locks, config }
    }

    async fn credit(&self, snapshot: &OrderSnapshot, amount: Money) -> Result<(), Error> {
        let key = user_balance_key(snapshot.user_id);
        with_lock(
            self.locks.as_ref(),
            &key,
            self.config.wait_time(),
            self.config.lease_time(),
            || async {
                let mut tx = self.stores.pool().begin().await.map_err(db)?;
                let user = self
                    .stores
                    .users
                    .find_by_id_for_update(&mut tx, snapshot.user_id)
                    .await?;
                self.stores
                    .users
                    .update_balance(
                        &mut tx,
                        snapshot.user_id,
                        user.balance.saturating_add(amount),
                        user.version,
                    )
                    .await?;
                tx.commit().await.map_err(db)?;
                Ok(())
            },
        )
        .await
    }
}

#[async_trait]
impl SagaStep for DeductBalanceStep {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn order(&self) -> u32 {
        2
    }

    async fn execute(&self, snapshot: &mut OrderSnapshot) -> Result<(), Error> {
        let key = user_balance_key(snapshot.user_id);
        with_lock(
            self.locks.as_ref(),
            &key,
            self.config.wait_time(),
            self.config.lease_time(),
            || async {
                let mut tx = self.stores.pool().begin().await.map_err(db)?;
                let user = self
                    .stores
                    .users
                    .find_by_id_for_update(&mut tx, snapshot.user_id)
                    .await?;
                let Some(remaining) = user.balance.checked_sub(snapshot.final_amount) else {
                    return Err(Error::InsufficientBalance {
                        user_id: snapshot.user_id,
                        required: snapshot.final_amount,
                        available: user.balance,
                    });
                };
                self.stores
                    .users
                    .update_balance(&mut tx, snapshot.user_id, remaining, user.version)
                    .await?;
                tx.commit().await.map_err(db)?;
                Ok(())
            },
        )
        .await
    }

    async fn compensate(&self, snapshot: &OrderSnapshot) -> Result<(), Error> {
        // The refund amount comes from the durable order when one exists;
        // mid-saga the order row hasn't been written yet and the snapshot's
        // final_amount is what the execute debited.
        let refund = if let Some(order_id) = snapshot.order_id {
            self.stores.orders.find_by_id(order_id).await?.final_amount
        } else {
            snapshot.final_amount
        };

        if refund == Money::ZERO {
            return Ok(());
        }
        self.credit(snapshot, refund).await
    }
}
