//! Step 1: deduct stock for every ordered option.

use async_trait::async_trait;
use std::sync::Arc;

use orderflow_core::config::SagaConfig;
use orderflow_core::error::Error;
use orderflow_core::lock::{product_stock_key, with_lock, DistributedLock, LockHandle};
use orderflow_core::types::OptionId;
use orderflow_postgres::PgStores;

use crate::step::{OrderSnapshot, SagaStep};
use crate::steps::{db, release_all};

/// Deducts `quantity` from each ordered option's stock, under the option's
/// KV lock and a pessimistic row lock, all lines in one transaction so a
/// mid-order shortfall leaves no partial deduction behind.
pub struct DeductInventoryStep {
    stores: Arc<PgStores>,
    locks: Arc<dyn DistributedLock>,
    config: SagaConfig,
}

impl DeductInventoryStep {
    /// Stable step name, as recorded in execution trails and failure records.
    pub const NAME: &'static str = "DeductInventoryStep";

    /// Create the step.
    #[must_use]
    pub fn new(stores: Arc<PgStores>, locks: Arc<dyn DistributedLock>, config: SagaConfig) -> Self {
        Self { stores, locks, config }
    }

    /// Acquire the stock locks for every distinct option, in sorted order so
    /// concurrent sagas over overlapping options cannot deadlock.
    async fn acquire_stock_locks(
        &self,
        option_ids: &[OptionId],
    ) -> Result<Vec<Box<dyn LockHandle>>, Error> {
        let mut handles = Vec::with_capacity(option_ids.len());
        for option_id in option_ids {
            let key = product_stock_key(*option_id);
            match self
                .locks
                .try_acquire(&key, self.config.wait_time(), self.config.lease_time())
                .await
            {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    release_all(handles).await;
                    return Err(e);
                }
            }
        }
        Ok(handles)
    }

    async fn deduct_all(&self, snapshot: &OrderSnapshot) -> Result<(), Error> {
        let mut tx = self.stores.pool().begin().await.map_err(db)?;
        for line in &snapshot.items {
            let option = self
                .stores
                .products
                .find_option_for_update(&mut tx, line.option_id)
                .await?;
            let requested =
                i32::try_from(line.quantity).map_err(|_| Error::InvalidQuantity(line.quantity))?;
            if option.stock < requested {
                return Err(Error::InsufficientStock {
                    option_id: line.option_id,
                    requested: line.quantity,
                    available: option.stock,
                });
            }
            self.stores
                .products
                .update_stock(&mut tx, line.option_id, option.stock - requested, option.version)
                .await?;
        }
        tx.commit().await.map_err(db)?;
        Ok(())
    }

    async fn restore_one(&self, option_id: OptionId, quantity: u32) -> Result<(), Error> {
        let key = product_stock_key(option_id);
        with_lock(
            self.locks.as_ref(),
            &key,
            self.config.wait_time(),
            self.config.lease_time(),
            || async {
                let mut tx = self.stores.pool().begin().await.map_err(db)?;
                let option = self
                    .stores
                    .products
                    .find_option_for_update(&mut tx, option_id)
                    .await?;
                let restored = i32::try_from(quantity)
                    .map_err(|_| Error::InvalidQuantity(quantity))?;
                self.stores
                    .products
                    .update_stock(&mut tx, option_id, option.stock + restored, option.version)
                    .await?;
                tx.commit().await.map_err(db)?;
                Ok(())
            },
        )
        .await
    }
}

#[async_trait]
impl SagaStep for DeductInventoryStep {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn order(&self) -> u32 {
        1
    }

    async fn execute(&self, snapshot: &mut OrderSnapshot) -> Result<(), Error> {
        let mut option_ids: Vec<OptionId> =
            snapshot.items.iter().map(|line| line.option_id).collect();
        option_ids.sort_unstable();
        option_ids.dedup();

        let handles = self.acquire_stock_locks(&option_ids).await?;
        let result = self.deduct_all(snapshot).await;
        release_all(handles).await;
        result
    }

    async fn compensate(&self, snapshot: &OrderSnapshot) -> Result<(), Error> {
        // Restore from the durable order items when the order exists (the
        // cancellation path, and any replay after a restart); otherwise the
        // step is being unwound mid-saga and its own committed deduction is
        // exactly the snapshot's lines.
        let restores: Vec<(OptionId, u32)> = if let Some(order_id) = snapshot.order_id {
            let mut conn = self.stores.pool().acquire().await.map_err(db)?;
            let items = self.stores.orders.find_items(&mut conn, order_id).await?;
            items.iter().map(|item| (item.option_id, item.quantity)).collect()
        } else {
            snapshot.items.iter().map(|line| (line.option_id, line.quantity)).collect()
        };

        let mut first_error: Option<Error> = None;
        for (option_id, quantity) in restores {
            if let Err(e) = self.restore_one(option_id, quantity).await {
                tracing::warn!(
                    option_id = option_id.get(),
                    error = %e,
                    "Stock restore failed; continuing with remaining options"
                );
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}
