//! The order saga orchestrator.
//!
//! Drives the configured steps in ascending order, retrying conflict and
//! transient errors per step with bounded backoff; on failure it walks the
//! execution trail backwards and compensates each committed step, routing
//! compensation errors through the [`FailureCompensationHandler`]. Every run
//! ends with exactly one terminal [`OrderSagaEvent`].
//!
//! The orchestrator holds no database transaction of its own — each step
//! opens and commits one — so a crash between steps loses nothing but the
//! in-memory trail, and the durable rows the steps wrote are exactly what a
//! replayed compensation reads back.

use std::sync::Arc;

use orderflow_core::compensation::CompensationFailure;
use orderflow_core::error::Error;
use orderflow_core::retry::RetryPolicy;
use orderflow_core::types::OrderId;

use crate::compensation::FailureCompensationHandler;
use crate::events::{OrderSagaEvent, SagaEvents};
use crate::step::{OrderRequest, OrderSnapshot, SagaStep};

/// Executes order sagas over a fixed, validated step sequence.
pub struct OrderSagaOrchestrator {
    steps: Vec<Arc<dyn SagaStep>>,
    handler: FailureCompensationHandler,
    events: SagaEvents,
    retry: RetryPolicy,
}

impl OrderSagaOrchestrator {
    /// Build an orchestrator over `steps`.
    ///
    /// Steps are sorted by [`SagaStep::order`]; a duplicate order value is a
    /// configuration error and construction fails.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] on duplicate step orders or an empty set.
    pub fn new(
        mut steps: Vec<Arc<dyn SagaStep>>,
        handler: FailureCompensationHandler,
        events: SagaEvents,
        retry: RetryPolicy,
    ) -> Result<Self, Error> {
        if steps.is_empty() {
            return Err(Error::Internal("saga has no steps".to_string()));
        }
        steps.sort_by_key(|step| step.order());
        for pair in steps.windows(2) {
            if pair[0].order() == pair[1].order() {
                return Err(Error::Internal(format!(
                    "duplicate step order {}: '{}' and '{}'",
                    pair[0].order(),
                    pair[0].name(),
                    pair[1].name(),
                )));
            }
        }
        Ok(Self { steps, handler, events, retry })
    }

    /// Subscribe to terminal saga events.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<OrderSagaEvent> {
        self.events.subscribe()
    }

    /// Run a saga to completion or compensated failure.
    ///
    /// # Errors
    ///
    /// Returns the failing step's business error (transient errors degrade
    /// to [`Error::OrderCreationFailed`] once the retry budget is spent), or
    /// [`Error::CompensationFailed`] when the rollback itself died.
    pub async fn execute(&self, request: OrderRequest) -> Result<OrderId, Error> {
        request.validate()?;
        let mut snapshot = OrderSnapshot::from_request(request);

        for step in &self.steps {
            match self.execute_step(step.as_ref(), &mut snapshot).await {
                Ok(()) => snapshot.record(step.name()),
                Err(e) => {
                    tracing::warn!(
                        step = step.name(),
                        user_id = snapshot.user_id.get(),
                        error = %e,
                        "Saga step failed; compensating"
                    );
                    return Err(self.fail(snapshot, e).await);
                }
            }
        }

        let order_id = snapshot
            .order_id
            .ok_or_else(|| Error::Internal("saga completed without an order id".to_string()))?;

        metrics::counter!("saga.completed").increment(1);
        self.events.emit(OrderSagaEvent::Completed {
            order_id,
            user_id: snapshot.user_id,
            final_amount: snapshot.final_amount,
        });
        Ok(order_id)
    }

    /// Run one step, retrying conflict/transient errors within the policy.
    async fn execute_step(
        &self,
        step: &dyn SagaStep,
        snapshot: &mut OrderSnapshot,
    ) -> Result<(), Error> {
        let mut attempt = 0;
        loop {
            match step.execute(snapshot).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && self.retry.allows(attempt) => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    tracing::debug!(
                        step = step.name(),
                        attempt = attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Retrying step"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Compensate the trail and emit the terminal failure event. Returns the
    /// error the caller should see.
    async fn fail(&self, snapshot: OrderSnapshot, cause: Error) -> Error {
        let surfaced = if cause.is_retryable() {
            Error::OrderCreationFailed(cause.to_string())
        } else {
            cause
        };

        match self.compensate(&snapshot).await {
            Ok(()) => {
                metrics::counter!("saga.compensated").increment(1);
                self.events.emit(OrderSagaEvent::Failed {
                    order_id: snapshot.order_id,
                    user_id: snapshot.user_id,
                    error: surfaced.to_string(),
                });
                surfaced
            }
            Err(critical) => {
                self.events.emit(OrderSagaEvent::CompensationFailed {
                    order_id: snapshot.order_id,
                    user_id: snapshot.user_id,
                    error: critical.to_string(),
                });
                critical
            }
        }
    }

    /// Walk the trail backwards, compensating each committed step.
    async fn compensate(&self, snapshot: &OrderSnapshot) -> Result<(), Error> {
        for name in snapshot.trail().iter().rev() {
            let Some(step) = self.steps.iter().find(|s| s.name() == *name) else {
                continue;
            };
            match step.compensate(snapshot).await {
                Ok(()) => {
                    tracing::debug!(step = step.name(), "Compensation succeeded");
                }
                Err(e) => {
                    let failure = CompensationFailure {
                        order_id: snapshot.order_id,
                        user_id: snapshot.user_id,
                        step_name: step.name(),
                        step_order: step.order(),
                        error: e,
                        context_snapshot: snapshot.to_json(),
                    };
                    // A critical failure halts the walk here.
                    self.handler.handle(failure).await?;
                }
            }
        }
        Ok(())
    }
}
