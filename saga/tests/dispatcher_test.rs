//! Dispatcher behaviour over the in-memory outbox and event log: the claim/
//! publish/mark state machine, retry accounting and abandonment.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code

use std::sync::Arc;

use orderflow_core::config::OutboxConfig;
use orderflow_core::outbox::DispatcherHandle;
use orderflow_core::types::{MessageType, OrderId, OutboxStatus, UserId};
use orderflow_saga::dispatcher::OutboxDispatcher;
use orderflow_testing::mocks::{InMemoryEventLog, InMemoryOutbox};

fn config() -> OutboxConfig {
    OutboxConfig { poll_interval_ms: 5_000, batch_size: 100, max_retries: 3 }
}

fn dispatcher(
    outbox: &Arc<InMemoryOutbox>,
    log: &Arc<InMemoryEventLog>,
) -> OutboxDispatcher {
    let (_tx, rx) = tokio::sync::watch::channel(false);
    OutboxDispatcher::new(
        outbox.clone(),
        log.clone(),
        config(),
        DispatcherHandle::new(),
        rx,
    )
}

fn seed(outbox: &InMemoryOutbox, order: i64) {
    outbox.insert(
        Some(OrderId::new(order)),
        UserId::new(1),
        MessageType::OrderCompleted,
        serde_json::json!({ "order_id": order, "user_id": 1 }),
    );
}

#[tokio::test]
async fn drains_pending_rows_to_published() {
    let outbox = Arc::new(InMemoryOutbox::new());
    let log = Arc::new(InMemoryEventLog::new());
    seed(&outbox, 1);
    seed(&outbox, 2);

    dispatcher(&outbox, &log).drain().await;

    let rows = outbox.snapshot();
    assert!(rows.iter().all(|r| r.status == OutboxStatus::Published));
    assert!(rows.iter().all(|r| r.sent_at.is_some()));

    let published = log.published();
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].topic, "order-events");
    assert_eq!(published[0].key, "1");
    assert_eq!(published[1].key, "2");
}

#[tokio::test]
async fn draining_twice_does_not_republish() {
    let outbox = Arc::new(InMemoryOutbox::new());
    let log = Arc::new(InMemoryEventLog::new());
    seed(&outbox, 1);

    let d = dispatcher(&outbox, &log);
    d.drain().await;
    d.drain().await;

    assert_eq!(log.published().len(), 1);
}

#[tokio::test]
async fn survives_one_publish_failure_without_abandoning() {
    // Scenario S5: three pending rows, the first publish call fails, the
    // rest succeed. Everything converges to PUBLISHED; the failed row shows
    // retry_count = 1; nothing is abandoned.
    let outbox = Arc::new(InMemoryOutbox::new());
    let log = Arc::new(InMemoryEventLog::new());
    for order in 1..=3 {
        seed(&outbox, order);
    }
    log.fail_next(1);

    let d = dispatcher(&outbox, &log);
    d.drain().await;
    d.drain().await;

    let rows = outbox.snapshot();
    assert!(rows.iter().all(|r| r.status == OutboxStatus::Published));
    assert_eq!(rows.iter().filter(|r| r.retry_count == 1).count(), 1);
    assert_eq!(rows.iter().filter(|r| r.retry_count == 0).count(), 2);
    assert!(!rows.iter().any(|r| r.status == OutboxStatus::Abandoned));
}

#[tokio::test]
async fn abandons_after_retry_budget() {
    let outbox = Arc::new(InMemoryOutbox::new());
    let log = Arc::new(InMemoryEventLog::new());
    seed(&outbox, 1);
    log.fail_next(10);

    let d = dispatcher(&outbox, &log);
    // Attempt 1: retry_count 0 -> released with 1.
    // Attempt 2: retry_count 1 -> released with 2.
    // Attempt 3: retry_count 2 -> 2 + 1 >= 3, abandoned.
    for _ in 0..3 {
        d.drain().await;
    }

    let rows = outbox.snapshot();
    assert_eq!(rows[0].status, OutboxStatus::Abandoned);
    assert_eq!(rows[0].retry_count, 2);
    assert!(log.published().is_empty());

    // An abandoned row is never reclaimed.
    d.drain().await;
    assert!(log.published().is_empty());
}

#[tokio::test]
async fn coupon_messages_fall_back_to_user_key_and_topic() {
    let outbox = Arc::new(InMemoryOutbox::new());
    let log = Arc::new(InMemoryEventLog::new());
    outbox.insert(
        None,
        UserId::new(77),
        MessageType::CouponIssued,
        serde_json::json!({ "coupon_id": 9 }),
    );

    dispatcher(&outbox, &log).drain().await;

    let published = log.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "coupon-events");
    assert_eq!(published[0].key, "77");
}
