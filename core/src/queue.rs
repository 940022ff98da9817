//! Partitioned coupon request log seam.
//!
//! Requests for one coupon always land in one partition, so contention on a
//! coupon's `remaining_qty` is serialized while different coupons proceed in
//! parallel. One worker consumes each partition; ordering within a partition
//! is strict FIFO.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Error;
use crate::types::{CouponId, CouponRequest};

/// A durable, partitioned, append-only request log keyed by coupon id.
#[async_trait]
pub trait CouponQueue: Send + Sync {
    /// Number of partitions; also the worker count.
    fn partitions(&self) -> u32;

    /// The partition requests for `coupon_id` land in.
    #[allow(clippy::cast_possible_truncation)]
    fn partition_for(&self, coupon_id: CouponId) -> u32 {
        (coupon_id.get().unsigned_abs() % u64::from(self.partitions())) as u32
    }

    /// Append a request to its coupon's partition tail, waiting up to
    /// `deadline` for intake capacity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueFull`] when the partition intake stays saturated
    /// past `deadline`, or a transport error from the log.
    async fn append(&self, request: &CouponRequest, deadline: Duration) -> Result<(), Error>;

    /// Take the next request from `partition`, waiting up to `timeout`.
    /// `None` means the partition stayed empty.
    ///
    /// # Errors
    ///
    /// Returns a transport error from the log.
    async fn poll(
        &self,
        partition: u32,
        timeout: Duration,
    ) -> Result<Option<CouponRequest>, Error>;

    /// Commit the consumer offset for `partition`, acknowledging everything
    /// polled so far.
    ///
    /// # Errors
    ///
    /// Returns a transport error from the log.
    async fn commit(&self, partition: u32) -> Result<(), Error>;
}
