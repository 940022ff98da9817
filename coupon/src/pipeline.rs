//! The enqueue and polling API of the coupon pipeline.
//!
//! `enqueue` returns a request id within its bounded budget: validate, cache
//! fast-path reject for unknown coupons, write the PENDING status, append to
//! the partitioned log. Everything slow happens later in a worker; the
//! caller polls `status` at ≈1 Hz until a terminal state appears.

use std::sync::Arc;
use std::time::Duration;

use orderflow_core::clock::Clock;
use orderflow_core::config::CouponConfig;
use orderflow_core::error::Error;
use orderflow_core::queue::CouponQueue;
use orderflow_core::status::StatusStore;
use orderflow_core::types::{AsyncStatus, CouponId, CouponRequest, RequestId, UserId};

use crate::cache::CouponCache;

/// In-process API of the coupon issuance pipeline.
pub struct CouponPipeline {
    queue: Arc<dyn CouponQueue>,
    status: Arc<dyn StatusStore>,
    cache: Arc<CouponCache>,
    clock: Arc<dyn Clock>,
    config: CouponConfig,
}

impl CouponPipeline {
    /// Create the pipeline API.
    #[must_use]
    pub fn new(
        queue: Arc<dyn CouponQueue>,
        status: Arc<dyn StatusStore>,
        cache: Arc<CouponCache>,
        clock: Arc<dyn Clock>,
        config: CouponConfig,
    ) -> Self {
        Self { queue, status, cache, clock, config }
    }

    /// Accept an issuance request and hand back the id to poll.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CouponNotFound`] for unknown coupons (fast path),
    /// [`Error::QueueFull`] when the partition intake stays saturated, or
    /// [`Error::EnqueueTimeout`] when the total budget elapses.
    pub async fn enqueue(&self, user_id: UserId, coupon_id: CouponId) -> Result<RequestId, Error> {
        if !self.cache.exists(coupon_id).await? {
            return Err(Error::CouponNotFound(coupon_id));
        }

        let request = CouponRequest::new(user_id, coupon_id, self.clock.now());
        self.status.put_pending(&request).await?;

        let deadline = self.config.enqueue_timeout();
        match tokio::time::timeout(deadline, self.queue.append(&request, deadline)).await {
            Ok(Ok(())) => {
                tracing::debug!(
                    request_id = %request.request_id,
                    user_id = user_id.get(),
                    coupon_id = coupon_id.get(),
                    "Coupon request enqueued"
                );
                Ok(request.request_id)
            }
            Ok(Err(e)) => {
                self.abandon_status(&request, &e).await;
                Err(e)
            }
            Err(_elapsed) => {
                let e = Error::EnqueueTimeout(self.config.enqueue_timeout_ms);
                self.abandon_status(&request, &e).await;
                Err(e)
            }
        }
    }

    /// Poll the status of a queued request. Unknown ids come back as
    /// `NOT_FOUND`, not as an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kv`] on status-store failure.
    pub async fn status(&self, request_id: RequestId) -> Result<AsyncStatus, Error> {
        self.status.get(request_id).await
    }

    /// A request whose append never made it leaves no work behind; close its
    /// status record so pollers of the returned id don't wait out the TTL.
    async fn abandon_status(&self, request: &CouponRequest, cause: &Error) {
        if let Err(e) = self.status.fail(request.request_id, &cause.to_string()).await {
            tracing::warn!(request_id = %request.request_id, error = %e, "Status close failed");
        }
    }
}

/// Default TTL for the enqueue fast-path cache.
pub const COUPON_CACHE_TTL: Duration = Duration::from_secs(30);
