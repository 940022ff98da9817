//! Redis backends for the Orderflow transactional core.
//!
//! Two concerns live here, both thin layers over one
//! [`redis::aio::ConnectionManager`]:
//!
//! - [`RedisLockProvider`] — the lease-bounded distributed lock guarding
//!   wallet and stock mutations
//! - [`RedisStatusStore`] — the short-lived per-request status records behind
//!   the coupon pipeline's polling API

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod lock;
mod status;

pub use lock::RedisLockProvider;
pub use status::RedisStatusStore;

use orderflow_core::error::Error;

/// Map a redis error into the domain's transient KV error.
pub(crate) fn kv_err(e: redis::RedisError) -> Error {
    Error::Kv(e.to_string())
}
