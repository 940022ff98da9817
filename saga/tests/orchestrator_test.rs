//! Orchestrator behaviour over scripted steps: ordering, trail bookkeeping,
//! LIFO compensation, retry policy and the critical-failure halt.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use orderflow_core::error::Error;
use orderflow_core::retry::RetryPolicy;
use orderflow_core::types::{Money, OptionId, OrderId, OrderLine, ProductId, UserId};
use orderflow_saga::compensation::FailureCompensationHandler;
use orderflow_saga::events::{OrderSagaEvent, SagaEvents};
use orderflow_saga::orchestrator::OrderSagaOrchestrator;
use orderflow_saga::step::{OrderRequest, OrderSnapshot, SagaStep};
use orderflow_testing::mocks::{InMemoryCompensationLog, RecordingAlertSink};

/// A scripted step that records its calls into a shared log.
struct MockStep {
    name: &'static str,
    order: u32,
    /// Results popped per execute call; empty means `Ok`.
    execute_script: Mutex<VecDeque<Result<(), Error>>>,
    /// Error every compensate call returns; `None` means `Ok`.
    compensate_error: Mutex<Option<Error>>,
    /// Set the snapshot's order id on successful execute (the terminal step).
    assigns_order: Option<OrderId>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockStep {
    fn new(name: &'static str, order: u32, calls: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name,
            order,
            execute_script: Mutex::new(VecDeque::new()),
            compensate_error: Mutex::new(None),
            assigns_order: None,
            calls,
        }
    }

    fn failing_execute(self, errors: Vec<Error>) -> Self {
        *self.execute_script.lock().unwrap() = errors.into_iter().map(Err).collect();
        self
    }

    fn failing_compensate(self, error: Error) -> Self {
        *self.compensate_error.lock().unwrap() = Some(error);
        self
    }

    fn assigning_order(mut self, order_id: OrderId) -> Self {
        self.assigns_order = Some(order_id);
        self
    }
}

#[async_trait]
impl SagaStep for MockStep {
    fn name(&self) -> &'static str {
        self.name
    }

    fn order(&self) -> u32 {
        self.order
    }

    async fn execute(&self, snapshot: &mut OrderSnapshot) -> Result<(), Error> {
        self.calls.lock().unwrap().push(format!("exec:{}", self.name));
        if let Some(result) = self.execute_script.lock().unwrap().pop_front() {
            return result;
        }
        if let Some(order_id) = self.assigns_order {
            snapshot.order_id = Some(order_id);
        }
        Ok(())
    }

    async fn compensate(&self, _snapshot: &OrderSnapshot) -> Result<(), Error> {
        self.calls.lock().unwrap().push(format!("comp:{}", self.name));
        match self.compensate_error.lock().unwrap().as_ref() {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

struct Harness {
    orchestrator: OrderSagaOrchestrator,
    calls: Arc<Mutex<Vec<String>>>,
    compensation_log: Arc<InMemoryCompensationLog>,
    alerts: Arc<RecordingAlertSink>,
    events: tokio::sync::broadcast::Receiver<OrderSagaEvent>,
}

fn harness(build: impl FnOnce(&Arc<Mutex<Vec<String>>>) -> Vec<Arc<dyn SagaStep>>) -> Harness {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let steps = build(&calls);
    let compensation_log = Arc::new(InMemoryCompensationLog::new());
    let alerts = Arc::new(RecordingAlertSink::new());
    let handler =
        FailureCompensationHandler::new(compensation_log.clone(), alerts.clone());
    let saga_events = SagaEvents::default();
    let events = saga_events.subscribe();
    let orchestrator = OrderSagaOrchestrator::new(
        steps,
        handler,
        saga_events,
        RetryPolicy {
            max_retries: 3,
            initial_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(4),
        },
    )
    .expect("valid step set");
    Harness { orchestrator, calls, compensation_log, alerts, events }
}

fn request() -> OrderRequest {
    OrderRequest {
        user_id: UserId::new(1),
        items: vec![OrderLine {
            product_id: ProductId::new(1),
            option_id: OptionId::new(101),
            product_name: "widget".to_string(),
            option_name: "blue".to_string(),
            quantity: 2,
            unit_price: Money::from_minor(10_000),
        }],
        coupon_id: None,
        coupon_discount: Money::ZERO,
        subtotal: Money::from_minor(20_000),
        final_amount: Money::from_minor(20_000),
    }
}

#[tokio::test]
async fn steps_run_in_ascending_order_regardless_of_construction_order() {
    let mut h = harness(|calls| {
        vec![
            Arc::new(
                MockStep::new("C", 3, calls.clone()).assigning_order(OrderId::new(42)),
            ),
            Arc::new(MockStep::new("A", 1, calls.clone())),
            Arc::new(MockStep::new("B", 2, calls.clone())),
        ]
    });

    let order_id = h.orchestrator.execute(request()).await.unwrap();
    assert_eq!(order_id, OrderId::new(42));
    assert_eq!(
        *h.calls.lock().unwrap(),
        vec!["exec:A", "exec:B", "exec:C"]
    );

    let event = h.events.try_recv().unwrap();
    assert_eq!(
        event,
        OrderSagaEvent::Completed {
            order_id: OrderId::new(42),
            user_id: UserId::new(1),
            final_amount: Money::from_minor(20_000),
        }
    );
}

#[tokio::test]
async fn duplicate_step_orders_fail_at_construction() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let steps: Vec<Arc<dyn SagaStep>> = vec![
        Arc::new(MockStep::new("A", 1, calls.clone())),
        Arc::new(MockStep::new("B", 1, calls.clone())),
    ];
    let handler = FailureCompensationHandler::new(
        Arc::new(InMemoryCompensationLog::new()),
        Arc::new(RecordingAlertSink::new()),
    );
    let result =
        OrderSagaOrchestrator::new(steps, handler, SagaEvents::default(), RetryPolicy::default());
    assert!(matches!(result, Err(Error::Internal(_))));
}

#[tokio::test]
async fn first_step_failure_compensates_nothing() {
    let mut h = harness(|calls| {
        vec![
            Arc::new(MockStep::new("A", 1, calls.clone()).failing_execute(vec![
                Error::InsufficientStock {
                    option_id: OptionId::new(101),
                    requested: 2,
                    available: 1,
                },
            ])),
            Arc::new(MockStep::new("B", 2, calls.clone())),
        ]
    });

    let err = h.orchestrator.execute(request()).await.unwrap_err();
    assert!(matches!(err, Error::InsufficientStock { .. }));
    // The failed step is not on the trail, so nothing compensates.
    assert_eq!(*h.calls.lock().unwrap(), vec!["exec:A"]);
    assert!(matches!(
        h.events.try_recv().unwrap(),
        OrderSagaEvent::Failed { order_id: None, .. }
    ));
}

#[tokio::test]
async fn later_failure_compensates_the_trail_in_reverse() {
    let h = harness(|calls| {
        vec![
            Arc::new(MockStep::new("A", 1, calls.clone())),
            Arc::new(MockStep::new("B", 2, calls.clone())),
            Arc::new(MockStep::new("C", 3, calls.clone()).failing_execute(vec![
                Error::InsufficientBalance {
                    user_id: UserId::new(1),
                    required: Money::from_minor(20_000),
                    available: Money::from_minor(1_000),
                },
            ])),
        ]
    });

    let err = h.orchestrator.execute(request()).await.unwrap_err();
    assert!(matches!(err, Error::InsufficientBalance { .. }));
    assert_eq!(
        *h.calls.lock().unwrap(),
        vec!["exec:A", "exec:B", "exec:C", "comp:B", "comp:A"]
    );
    assert!(h.compensation_log.entries().is_empty());
    assert!(h.alerts.alerts().is_empty());
}

#[tokio::test]
async fn retryable_errors_are_retried_within_budget() {
    let mut h = harness(|calls| {
        vec![Arc::new(
            MockStep::new("A", 1, calls.clone())
                .failing_execute(vec![
                    Error::VersionConflict { entity: "users", id: 1 },
                    Error::LockTimeout { key: "user:balance:1".to_string() },
                ])
                .assigning_order(OrderId::new(7)),
        )]
    });

    let order_id = h.orchestrator.execute(request()).await.unwrap();
    assert_eq!(order_id, OrderId::new(7));
    // Two scripted failures consumed, third attempt succeeded.
    assert_eq!(
        *h.calls.lock().unwrap(),
        vec!["exec:A", "exec:A", "exec:A"]
    );
    assert!(matches!(h.events.try_recv().unwrap(), OrderSagaEvent::Completed { .. }));
}

#[tokio::test]
async fn exhausted_transient_retries_degrade_to_order_creation_failed() {
    let mut h = harness(|calls| {
        vec![
            Arc::new(MockStep::new("A", 1, calls.clone())),
            Arc::new(MockStep::new("B", 2, calls.clone()).failing_execute(vec![
                Error::Database("down".to_string()),
                Error::Database("down".to_string()),
                Error::Database("down".to_string()),
                Error::Database("down".to_string()),
            ])),
        ]
    });

    let err = h.orchestrator.execute(request()).await.unwrap_err();
    assert!(matches!(err, Error::OrderCreationFailed(_)));
    // 1 try + 3 retries on B, then A compensates.
    assert_eq!(
        *h.calls.lock().unwrap(),
        vec!["exec:A", "exec:B", "exec:B", "exec:B", "exec:B", "comp:A"]
    );
    assert!(matches!(h.events.try_recv().unwrap(), OrderSagaEvent::Failed { .. }));
}

#[tokio::test]
async fn business_errors_are_never_retried() {
    let h = harness(|calls| {
        vec![Arc::new(MockStep::new("A", 1, calls.clone()).failing_execute(vec![
            Error::InsufficientStock {
                option_id: OptionId::new(101),
                requested: 2,
                available: 0,
            },
        ]))]
    });

    h.orchestrator.execute(request()).await.unwrap_err();
    assert_eq!(*h.calls.lock().unwrap(), vec!["exec:A"]);
}

#[tokio::test]
async fn non_critical_compensation_failure_is_recorded_and_walk_continues() {
    let mut h = harness(|calls| {
        vec![
            Arc::new(MockStep::new("A", 1, calls.clone())),
            Arc::new(MockStep::new("B", 2, calls.clone()).failing_compensate(
                Error::LockTimeout { key: "product:stock:101".to_string() },
            )),
            Arc::new(MockStep::new("C", 3, calls.clone()).failing_execute(vec![
                Error::InsufficientBalance {
                    user_id: UserId::new(1),
                    required: Money::from_minor(20_000),
                    available: Money::ZERO,
                },
            ])),
        ]
    });

    let err = h.orchestrator.execute(request()).await.unwrap_err();
    assert!(matches!(err, Error::InsufficientBalance { .. }));
    // B's compensation failed best-effort; A still compensates.
    assert_eq!(
        *h.calls.lock().unwrap(),
        vec!["exec:A", "exec:B", "exec:C", "comp:B", "comp:A"]
    );

    let recorded = h.compensation_log.entries();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].step_name, "B");
    assert!(h.alerts.alerts().is_empty());
    assert!(matches!(h.events.try_recv().unwrap(), OrderSagaEvent::Failed { .. }));
}

#[tokio::test]
async fn critical_compensation_failure_alerts_and_halts() {
    // The shape of scenario S6: a forced exception inside a compensation.
    let order_id = OrderId::new(5001);
    let mut h = harness(|calls| {
        vec![
            Arc::new(MockStep::new("DeductInventoryStep", 1, calls.clone())
                .failing_compensate(Error::Internal("forced".to_string()))),
            Arc::new(MockStep::new("DeductBalanceStep", 2, calls.clone())),
            Arc::new(
                MockStep::new("CreateOrderStep", 3, calls.clone())
                    .assigning_order(order_id)
                    .failing_execute(vec![Error::Database("down".to_string()); 4]),
            ),
        ]
    });

    let err = h.orchestrator.execute(request()).await.unwrap_err();
    assert!(matches!(err, Error::CompensationFailed { step: "DeductInventoryStep", .. }));

    // Balance compensates first (LIFO); inventory's compensation fails
    // critically and the walk halts — nothing runs after it.
    let calls = h.calls.lock().unwrap().clone();
    assert_eq!(calls.last().unwrap(), "comp:DeductInventoryStep");
    assert_eq!(
        calls.iter().filter(|c| c.starts_with("comp:")).count(),
        2,
        "only balance and inventory compensations ran"
    );

    let alerts = h.alerts.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].step_name, "DeductInventoryStep");

    let recorded = h.compensation_log.entries();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].step_name, "DeductInventoryStep");

    assert!(matches!(
        h.events.try_recv().unwrap(),
        OrderSagaEvent::CompensationFailed { .. }
    ));
}
