//! # Orderflow Testing
//!
//! In-memory implementations of every trait seam in `orderflow-core`, for
//! fast deterministic tests that need no Postgres, Redis or Redpanda:
//!
//! - [`mocks::FixedClock`] — deterministic time
//! - [`mocks::InMemoryLockProvider`] — process-local mutual exclusion
//! - [`mocks::InMemoryEventLog`] — records publishes, failures scriptable
//! - [`mocks::InMemoryOutbox`] — the outbox state machine over a `Vec`
//! - [`mocks::InMemoryCouponQueue`] — bounded per-partition FIFO queues
//! - [`mocks::InMemoryStatusStore`] — per-request status records
//! - [`mocks::InMemoryCompensationLog`] / [`mocks::InMemoryDeadLetters`]
//! - [`mocks::RecordingAlertSink`] — captures critical alerts
//! - [`mocks::StubIssuer`] — a scriptable issuance core

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod mocks;

pub use mocks::{test_clock, FixedClock};
