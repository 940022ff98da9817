//! # Orderflow Coupon
//!
//! The first-come-first-served coupon issuance pipeline: far more concurrent
//! requests than coupons, no over-issuance, bounded enqueue latency.
//!
//! ```text
//! enqueue(user, coupon) ──► cache check ──► PENDING status
//!        │                                      │
//!        └── append, key = coupon_id ──► partitioned log
//!                                            │ one worker per partition
//!                                            ▼
//!                          issue_one: coupon row FOR UPDATE,
//!                          uniqueness, decrement (+deactivate at 0),
//!                          COUPON_ISSUED outbox row — one commit
//!                                            │
//!                  business failure ─► FAILED status (no retry)
//!                  transient failure ─► re-append, retry_count+1
//!                        budget spent ─► dead letter + FAILED
//!                             success ─► COMPLETED status
//! ```
//!
//! Keying the log by `coupon_id` serializes all contention for one coupon
//! into one partition — strict FCFS per coupon — while different coupons
//! issue in parallel. Keying by user would scatter one coupon's requests
//! across consumers and break arrival order.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod pipeline;
mod service;
mod worker;

pub use cache::CouponCache;
pub use pipeline::{CouponPipeline, COUPON_CACHE_TTL};
pub use service::CouponIssueService;
pub use worker::CouponWorkerPool;

use orderflow_core::error::Error;

/// Map a sqlx error into the domain's transient database error.
pub(crate) fn db(e: sqlx::Error) -> Error {
    Error::Database(e.to_string())
}
