//! The four concrete steps of the order saga.
//!
//! Forward order: deduct inventory (1) → deduct balance (2) → use coupon (3)
//! → create order + outbox row (4). Each step opens its own transaction and
//! takes whatever KV locks its rows require; nothing spans steps except the
//! snapshot.

mod create_order;
mod deduct_balance;
mod deduct_inventory;
mod use_coupon;

pub use create_order::CreateOrderStep;
pub use deduct_balance::DeductBalanceStep;
pub use deduct_inventory::DeductInventoryStep;
pub use use_coupon::UseCouponStep;

use orderflow_core::error::Error;
use orderflow_core::lock::LockHandle;

/// Map a sqlx error into the domain's transient database error.
pub(crate) fn db(e: sqlx::Error) -> Error {
    Error::Database(e.to_string())
}

/// Release a set of lock handles, logging rather than propagating failures —
/// the lease expires anything a release misses.
pub(crate) async fn release_all(handles: Vec<Box<dyn LockHandle>>) {
    for handle in handles {
        if let Err(e) = handle.release().await {
            tracing::warn!(error = %e, "Lock release failed; lease will expire it");
        }
    }
}
