//! # Orderflow Core
//!
//! Domain types, error taxonomy and trait seams for the Orderflow
//! transactional core: an order saga with LIFO compensation and a
//! first-come-first-served coupon issuance pipeline.
//!
//! # Architecture
//!
//! ```text
//!                ┌─────────────────┐
//!  order ───────►│ Saga            │ steps 1..4, each in its own
//!                │ Orchestrator    │ DB transaction
//!                └──────┬──────────┘
//!                       │ final step writes order + outbox row,
//!                       ▼ then nudges the dispatcher
//!                ┌─────────────────┐      ┌──────────────┐
//!                │ Outbox          ├─────►│  Event log   │
//!                │ Dispatcher      │      │ (at-least-   │
//!                └─────────────────┘      │  once)       │
//!                                         └──────────────┘
//!  coupon ──────►┌─────────────────┐      ┌──────────────┐
//!  request       │ Partitioned log ├─────►│ Worker per   │
//!  (keyed by     │ (N partitions)  │      │ partition    │
//!   coupon_id)   └─────────────────┘      └──────┬───────┘
//!                                                │ terminal state
//!                                                ▼
//!                                         ┌──────────────┐
//!                                         │ Async status │◄── polling
//!                                         └──────────────┘
//! ```
//!
//! This crate holds no I/O: the Postgres, Redis and Redpanda crates implement
//! the seams defined here, and `orderflow-testing` provides in-memory
//! versions of each for tests.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod alert;
pub mod clock;
pub mod compensation;
pub mod config;
pub mod error;
pub mod event_log;
pub mod lock;
pub mod outbox;
pub mod pipeline;
pub mod queue;
pub mod retry;
pub mod status;
pub mod telemetry;
pub mod types;

pub use error::{Error, ErrorKind};
