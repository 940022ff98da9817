//! Distributed mutual exclusion over a shared key/value store.
//!
//! The lock is lease-bounded: a crashed holder stalls contenders for at most
//! the lease, never forever. Re-entrance is not supported and not needed —
//! each saga step acquires its keys once, does its row work, and releases.
//!
//! Callers go through [`with_lock`], which guarantees release on every normal
//! exit path; if the guarded future panics, the lease expiry bounds the
//! damage, and backends additionally release best-effort on guard drop.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Error;
use crate::types::{OptionId, UserId};

/// Key guarding wallet mutations for one user.
#[must_use]
pub fn user_balance_key(user_id: UserId) -> String {
    format!("user:balance:{user_id}")
}

/// Key guarding stock mutations for one product option.
#[must_use]
pub fn product_stock_key(option_id: OptionId) -> String {
    format!("product:stock:{option_id}")
}

/// A held lock. Dropping the handle without calling [`LockHandle::release`]
/// leaves cleanup to the backend's best-effort drop path and, ultimately, the
/// lease expiry.
#[async_trait]
pub trait LockHandle: Send {
    /// Release the lock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kv`] if the store is unreachable; the lease still
    /// expires the lock in that case.
    async fn release(self: Box<Self>) -> Result<(), Error>;
}

/// Lease-bounded distributed lock provider.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Acquire `key`, waiting up to `wait` and holding a lease of `lease`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockTimeout`] when the key stays contended past
    /// `wait`, or [`Error::Kv`] on store failure.
    async fn try_acquire(
        &self,
        key: &str,
        wait: Duration,
        lease: Duration,
    ) -> Result<Box<dyn LockHandle>, Error>;
}

/// Run `f` while holding `key`, releasing on every normal exit path.
///
/// The guarded future's result is returned whether it is `Ok` or `Err`;
/// a release failure is logged and swallowed because the lease already
/// bounds how long the key can stay held.
///
/// # Errors
///
/// Returns [`Error::LockTimeout`] when acquisition exceeds `wait`, otherwise
/// whatever `f` returns.
pub async fn with_lock<T, F, Fut>(
    locks: &dyn DistributedLock,
    key: &str,
    wait: Duration,
    lease: Duration,
    f: F,
) -> Result<T, Error>
where
    F: FnOnce() -> Fut + Send,
    Fut: std::future::Future<Output = Result<T, Error>> + Send,
{
    let handle = locks.try_acquire(key, wait, lease).await?;
    let out = f().await;
    if let Err(e) = handle.release().await {
        tracing::warn!(key = key, error = %e, "Lock release failed; lease will expire it");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_follow_documented_patterns() {
        assert_eq!(user_balance_key(UserId::new(7)), "user:balance:7");
        assert_eq!(product_stock_key(OptionId::new(101)), "product:stock:101");
    }
}
