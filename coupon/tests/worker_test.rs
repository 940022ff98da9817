//! Worker-pool behaviour over the in-memory queue and a scripted issuer:
//! contention counting, the business/transient failure split, retry budget
//! and dead-lettering, and per-partition FIFO.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use orderflow_core::config::CouponConfig;
use orderflow_core::queue::CouponQueue;
use orderflow_core::status::StatusStore;
use orderflow_core::types::{CouponId, CouponRequest, RequestState, UserId};
use orderflow_coupon::CouponWorkerPool;
use orderflow_testing::mocks::{
    InMemoryCouponQueue, InMemoryDeadLetters, InMemoryStatusStore, StubIssuer,
};

fn config(partitions: u32) -> CouponConfig {
    CouponConfig {
        partitions,
        max_retries: 3,
        enqueue_timeout_ms: 500,
        worker_deadline_ms: 1_000,
        poll_timeout_ms: 20,
    }
}

struct Harness {
    queue: Arc<InMemoryCouponQueue>,
    issuer: Arc<StubIssuer>,
    status: Arc<InMemoryStatusStore>,
    dead_letters: Arc<InMemoryDeadLetters>,
    shutdown: tokio::sync::watch::Sender<bool>,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

fn start(partitions: u32, remaining: i64) -> Harness {
    let queue = Arc::new(InMemoryCouponQueue::new(partitions, 256));
    let issuer = Arc::new(StubIssuer::new(remaining));
    let status = Arc::new(InMemoryStatusStore::new());
    let dead_letters = Arc::new(InMemoryDeadLetters::new());
    let (shutdown, rx) = tokio::sync::watch::channel(false);

    let pool = CouponWorkerPool::new(
        queue.clone(),
        issuer.clone(),
        status.clone(),
        dead_letters.clone(),
        config(partitions),
        rx,
    );
    let workers = pool.spawn();

    Harness { queue, issuer, status, dead_letters, shutdown, workers }
}

impl Harness {
    async fn enqueue(&self, user: i64, coupon: i64) -> CouponRequest {
        let request = CouponRequest::new(UserId::new(user), CouponId::new(coupon), Utc::now());
        self.status.put_pending(&request).await.unwrap();
        self.queue
            .append(&request, Duration::from_millis(500))
            .await
            .unwrap();
        request
    }

    async fn wait_for_terminal(&self, expected: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let terminal = self.status.count_in_state(RequestState::Completed)
                + self.status.count_in_state(RequestState::Failed);
            if terminal >= expected {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {expected} terminal statuses ({terminal} so far)"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn stop(self) {
        self.shutdown.send(true).unwrap();
        for worker in self.workers {
            worker.await.unwrap();
        }
    }
}

#[tokio::test]
async fn contended_coupon_issues_exactly_remaining_qty() {
    // The shape of scenario S4: 100 unique users race for 10 units of one
    // coupon. Exactly 10 complete, 90 fail, and nothing is dead-lettered —
    // out-of-stock is a business outcome, not an infrastructure failure.
    let h = start(4, 10);
    for user in 1..=100 {
        h.enqueue(user, 1).await;
    }

    h.wait_for_terminal(100).await;

    assert_eq!(h.status.count_in_state(RequestState::Completed), 10);
    assert_eq!(h.status.count_in_state(RequestState::Failed), 90);
    assert_eq!(h.issuer.issued_count(), 10);
    assert!(h.dead_letters.entries().is_empty());
    h.stop().await;
}

#[tokio::test]
async fn transient_failures_retry_and_then_succeed() {
    let h = start(1, 5);
    h.issuer.fail_next(2);
    let request = h.enqueue(1, 1).await;

    h.wait_for_terminal(1).await;

    let status = h.status.get(request.request_id).await.unwrap();
    assert_eq!(status.state, RequestState::Completed);
    assert!(h.dead_letters.entries().is_empty());
    h.stop().await;
}

#[tokio::test]
async fn exhausted_retries_land_in_the_dead_letter_store() {
    let h = start(1, 5);
    h.issuer.fail_next(100);
    let request = h.enqueue(1, 1).await;

    h.wait_for_terminal(1).await;

    let status = h.status.get(request.request_id).await.unwrap();
    assert_eq!(status.state, RequestState::Failed);
    assert_eq!(status.error.as_deref(), Some("exhausted retries"));

    let dead = h.dead_letters.entries();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].0.request_id, request.request_id);
    assert_eq!(dead[0].0.retry_count, 3);
    h.stop().await;
}

#[tokio::test]
async fn business_failures_are_terminal_on_first_attempt() {
    let h = start(1, 5);
    let first = h.enqueue(1, 1).await;
    h.wait_for_terminal(1).await;

    // Same pair again: already issued, fails without retry or dead letter.
    let duplicate = h.enqueue(1, 1).await;
    h.wait_for_terminal(2).await;

    assert_eq!(
        h.status.get(first.request_id).await.unwrap().state,
        RequestState::Completed
    );
    let dup_status = h.status.get(duplicate.request_id).await.unwrap();
    assert_eq!(dup_status.state, RequestState::Failed);
    assert!(dup_status.error.unwrap().contains("already issued"));
    assert!(h.dead_letters.entries().is_empty());
    h.stop().await;
}

#[tokio::test]
async fn partition_preserves_enqueue_order() {
    // Pure queue-level FCFS: one partition, three appends, polled in order.
    let queue = InMemoryCouponQueue::new(1, 16);
    let mut ids = Vec::new();
    for user in 1..=3 {
        let request = CouponRequest::new(UserId::new(user), CouponId::new(1), Utc::now());
        ids.push(request.request_id);
        queue.append(&request, Duration::from_millis(100)).await.unwrap();
    }

    for expected in ids {
        let polled = queue
            .poll(0, Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(polled.request_id, expected);
    }
}

#[tokio::test]
async fn full_partition_rejects_after_deadline() {
    let queue = InMemoryCouponQueue::new(1, 1);
    let first = CouponRequest::new(UserId::new(1), CouponId::new(1), Utc::now());
    queue.append(&first, Duration::from_millis(50)).await.unwrap();

    let second = CouponRequest::new(UserId::new(2), CouponId::new(1), Utc::now());
    let err = queue
        .append(&second, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, orderflow_core::error::Error::QueueFull { partition: 0 }));
}
