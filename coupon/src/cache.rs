//! Read-through existence cache for the enqueue fast path.
//!
//! Enqueue has a ≈10 ms budget; hitting Postgres for every unknown-coupon
//! probe would blow it under spike load. Entries (positive and negative)
//! live for a short TTL — a coupon created mid-spike is visible within one
//! TTL, which is acceptable for a fast-path reject.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use orderflow_core::error::Error;
use orderflow_core::types::CouponId;
use orderflow_postgres::PgCouponStore;

/// TTL cache over [`PgCouponStore::exists`].
pub struct CouponCache {
    coupons: PgCouponStore,
    ttl: Duration,
    entries: RwLock<HashMap<CouponId, (bool, Instant)>>,
}

impl CouponCache {
    /// Create a cache with the given entry TTL.
    #[must_use]
    pub fn new(coupons: PgCouponStore, ttl: Duration) -> Self {
        Self { coupons, ttl, entries: RwLock::new(HashMap::new()) }
    }

    /// Whether the coupon exists, served from cache when fresh.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] when a cache miss hits the store and the
    /// store fails.
    pub async fn exists(&self, coupon_id: CouponId) -> Result<bool, Error> {
        if let Some(hit) = self.lookup(coupon_id) {
            return Ok(hit);
        }

        let exists = self.coupons.exists(coupon_id).await?;
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(coupon_id, (exists, Instant::now()));
        }
        Ok(exists)
    }

    fn lookup(&self, coupon_id: CouponId) -> Option<bool> {
        let entries = self.entries.read().ok()?;
        let (exists, stored_at) = entries.get(&coupon_id)?;
        (stored_at.elapsed() < self.ttl).then_some(*exists)
    }
}
