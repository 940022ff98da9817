//! # Orderflow Saga
//!
//! The order saga: four steps executed in order, each in its own database
//! transaction, with LIFO compensation on failure and a transactional outbox
//! feeding the external event log.
//!
//! ```text
//! execute_saga(request)
//!   │
//!   ├─ 1 DeductInventoryStep   stock  -= qty   (KV lock + row lock)
//!   ├─ 2 DeductBalanceStep     wallet -= total (KV lock + row lock)
//!   ├─ 3 UseCouponStep         UNUSED -> USED  (row lock)
//!   └─ 4 CreateOrderStep       order + items + outbox row, one commit
//!        │
//!        └─ wake ──► OutboxDispatcher ──► event log (at-least-once)
//!
//! on step failure: compensate the trail in reverse; critical compensation
//! errors alert, record, and halt; the rest record and continue.
//! ```
//!
//! Cancellation reuses the same compensations against durable state, so a
//! completed order unwinds exactly once no matter how often it is retried.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cancellation;
pub mod compensation;
pub mod dispatcher;
pub mod events;
pub mod orchestrator;
pub mod step;
pub mod steps;

pub use cancellation::OrderCancellationService;
pub use compensation::FailureCompensationHandler;
pub use dispatcher::{DispatcherHandle, OutboxDispatcher};
pub use events::{OrderSagaEvent, SagaEvents};
pub use orchestrator::OrderSagaOrchestrator;
pub use step::{OrderRequest, OrderSnapshot, SagaStep};
