//! In-memory mock implementations of the core trait seams.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use orderflow_core::alert::AlertSink;
use orderflow_core::clock::Clock;
use orderflow_core::compensation::{CompensationFailure, CompensationLog};
use orderflow_core::error::Error;
use orderflow_core::event_log::EventLog;
use orderflow_core::lock::{DistributedLock, LockHandle};
use orderflow_core::outbox::Outbox;
use orderflow_core::pipeline::{CouponIssuer, DeadLetterSink};
use orderflow_core::queue::CouponQueue;
use orderflow_core::status::StatusStore;
use orderflow_core::types::{
    AsyncStatus, CouponId, CouponRequest, MessageId, MessageType, OrderId, OutboxMessage,
    OutboxStatus, RequestId, RequestState, UserCouponId, UserCouponStatus, UserCouponView,
    UserId,
};

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Clock
// ============================================================================

/// Fixed clock for deterministic tests: always returns the same time.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    time: DateTime<Utc>,
}

impl FixedClock {
    /// Create a fixed clock at the given time.
    #[must_use]
    pub const fn new(time: DateTime<Utc>) -> Self {
        Self { time }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.time
    }
}

/// Default fixed clock for tests (2025-06-01 00:00:00 UTC).
///
/// # Panics
///
/// Panics if the hardcoded timestamp fails to parse, which cannot happen.
#[must_use]
#[allow(clippy::expect_used)]
pub fn test_clock() -> FixedClock {
    FixedClock::new(
        DateTime::parse_from_rfc3339("2025-06-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc),
    )
}

// ============================================================================
// Distributed lock
// ============================================================================

/// Process-local [`DistributedLock`] over a set of held keys.
#[derive(Default, Clone)]
pub struct InMemoryLockProvider {
    held: Arc<Mutex<HashSet<String>>>,
}

impl InMemoryLockProvider {
    /// Create an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` is currently held.
    #[must_use]
    pub fn is_held(&self, key: &str) -> bool {
        locked(&self.held).contains(key)
    }
}

#[async_trait]
impl DistributedLock for InMemoryLockProvider {
    async fn try_acquire(
        &self,
        key: &str,
        wait: Duration,
        _lease: Duration,
    ) -> Result<Box<dyn LockHandle>, Error> {
        let deadline = Instant::now() + wait;
        loop {
            if locked(&self.held).insert(key.to_string()) {
                return Ok(Box::new(InMemoryLockHandle {
                    held: Arc::clone(&self.held),
                    key: key.to_string(),
                    released: false,
                }));
            }
            if Instant::now() >= deadline {
                return Err(Error::LockTimeout { key: key.to_string() });
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

struct InMemoryLockHandle {
    held: Arc<Mutex<HashSet<String>>>,
    key: String,
    released: bool,
}

#[async_trait]
impl LockHandle for InMemoryLockHandle {
    async fn release(mut self: Box<Self>) -> Result<(), Error> {
        locked(&self.held).remove(&self.key);
        self.released = true;
        Ok(())
    }
}

impl Drop for InMemoryLockHandle {
    fn drop(&mut self) {
        if !self.released {
            locked(&self.held).remove(&self.key);
        }
    }
}

// ============================================================================
// Event log
// ============================================================================

/// One record the [`InMemoryEventLog`] accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedEvent {
    /// Target topic.
    pub topic: String,
    /// Partition key.
    pub key: String,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

/// Recording [`EventLog`] with scriptable transient failures.
#[derive(Default)]
pub struct InMemoryEventLog {
    published: Mutex<Vec<PublishedEvent>>,
    fail_remaining: AtomicU32,
}

impl InMemoryEventLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` publish calls fail with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// Everything published so far, in order.
    #[must_use]
    pub fn published(&self) -> Vec<PublishedEvent> {
        locked(&self.published).clone()
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), Error> {
        if self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::Publish {
                topic: topic.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        locked(&self.published).push(PublishedEvent {
            topic: topic.to_string(),
            key: key.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }
}

// ============================================================================
// Outbox
// ============================================================================

/// The outbox state machine over an in-memory row set.
#[derive(Default)]
pub struct InMemoryOutbox {
    rows: Mutex<Vec<OutboxMessage>>,
    next_id: AtomicI64,
}

impl InMemoryOutbox {
    /// Create an empty outbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a PENDING row, as the saga's final transaction would.
    pub fn insert(
        &self,
        order_id: Option<OrderId>,
        user_id: UserId,
        message_type: MessageType,
        payload: serde_json::Value,
    ) -> MessageId {
        let id = MessageId::new(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        locked(&self.rows).push(OutboxMessage {
            message_id: id,
            order_id,
            user_id,
            message_type,
            payload,
            status: OutboxStatus::Pending,
            retry_count: 0,
            last_attempt: None,
            sent_at: None,
            created_at: Utc::now(),
        });
        id
    }

    /// All rows, in insertion order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<OutboxMessage> {
        locked(&self.rows).clone()
    }

    fn transition(
        &self,
        id: MessageId,
        from: OutboxStatus,
        apply: impl FnOnce(&mut OutboxMessage),
    ) {
        let mut rows = locked(&self.rows);
        if let Some(row) = rows
            .iter_mut()
            .find(|row| row.message_id == id && row.status == from)
        {
            apply(row);
        }
    }
}

#[async_trait]
impl Outbox for InMemoryOutbox {
    async fn claim_pending(&self, batch: usize) -> Result<Vec<OutboxMessage>, Error> {
        let mut rows = locked(&self.rows);
        let mut claimed = Vec::new();
        for row in rows.iter_mut() {
            if claimed.len() >= batch {
                break;
            }
            if row.status == OutboxStatus::Pending {
                row.status = OutboxStatus::Publishing;
                row.last_attempt = Some(Utc::now());
                claimed.push(row.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_published(&self, id: MessageId) -> Result<(), Error> {
        self.transition(id, OutboxStatus::Publishing, |row| {
            row.status = OutboxStatus::Published;
            row.sent_at = Some(Utc::now());
        });
        Ok(())
    }

    async fn release_for_retry(&self, id: MessageId) -> Result<(), Error> {
        self.transition(id, OutboxStatus::Publishing, |row| {
            row.status = OutboxStatus::Pending;
            row.retry_count += 1;
        });
        Ok(())
    }

    async fn mark_abandoned(&self, id: MessageId) -> Result<(), Error> {
        self.transition(id, OutboxStatus::Publishing, |row| {
            row.status = OutboxStatus::Abandoned;
        });
        Ok(())
    }

    async fn mark_failed(&self, id: MessageId) -> Result<(), Error> {
        self.transition(id, OutboxStatus::Publishing, |row| {
            row.status = OutboxStatus::Failed;
        });
        Ok(())
    }
}

// ============================================================================
// Coupon queue
// ============================================================================

/// Bounded per-partition FIFO queues implementing [`CouponQueue`].
pub struct InMemoryCouponQueue {
    partitions: u32,
    capacity: usize,
    queues: Vec<Mutex<VecDeque<CouponRequest>>>,
}

impl InMemoryCouponQueue {
    /// Create a queue with `partitions` partitions of `capacity` each.
    #[must_use]
    pub fn new(partitions: u32, capacity: usize) -> Self {
        let queues = (0..partitions).map(|_| Mutex::new(VecDeque::new())).collect();
        Self { partitions, capacity, queues }
    }

    /// Depth of one partition.
    #[must_use]
    pub fn len(&self, partition: u32) -> usize {
        self.queues
            .get(partition as usize)
            .map_or(0, |q| locked(q).len())
    }

    /// Whether every partition is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queues.iter().all(|q| locked(q).is_empty())
    }
}

#[async_trait]
impl CouponQueue for InMemoryCouponQueue {
    fn partitions(&self) -> u32 {
        self.partitions
    }

    async fn append(&self, request: &CouponRequest, deadline: Duration) -> Result<(), Error> {
        let partition = self.partition_for(request.coupon_id);
        let queue = self
            .queues
            .get(partition as usize)
            .ok_or_else(|| Error::Internal(format!("no partition {partition}")))?;

        let limit = Instant::now() + deadline;
        loop {
            {
                let mut q = locked(queue);
                if q.len() < self.capacity {
                    q.push_back(request.clone());
                    return Ok(());
                }
            }
            if Instant::now() >= limit {
                return Err(Error::QueueFull { partition });
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn poll(
        &self,
        partition: u32,
        timeout: Duration,
    ) -> Result<Option<CouponRequest>, Error> {
        let queue = self
            .queues
            .get(partition as usize)
            .ok_or_else(|| Error::Internal(format!("no partition {partition}")))?;

        let limit = Instant::now() + timeout;
        loop {
            if let Some(request) = locked(queue).pop_front() {
                return Ok(Some(request));
            }
            if Instant::now() >= limit {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn commit(&self, _partition: u32) -> Result<(), Error> {
        Ok(())
    }
}

// ============================================================================
// Status store
// ============================================================================

#[derive(Clone)]
struct StatusEntry {
    state: RequestState,
    result: Option<UserCouponView>,
    error: Option<String>,
    enqueued_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// In-memory [`StatusStore`].
#[derive(Default)]
pub struct InMemoryStatusStore {
    entries: Mutex<HashMap<RequestId, StatusEntry>>,
}

impl InMemoryStatusStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count records currently in `state`.
    #[must_use]
    pub fn count_in_state(&self, state: RequestState) -> usize {
        locked(&self.entries)
            .values()
            .filter(|entry| entry.state == state)
            .count()
    }

    fn upsert(&self, request_id: RequestId, apply: impl FnOnce(&mut StatusEntry)) {
        let mut entries = locked(&self.entries);
        let entry = entries.entry(request_id).or_insert_with(|| StatusEntry {
            state: RequestState::Pending,
            result: None,
            error: None,
            enqueued_at: Utc::now(),
            updated_at: Utc::now(),
        });
        apply(entry);
        entry.updated_at = Utc::now();
    }
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn put_pending(&self, request: &CouponRequest) -> Result<(), Error> {
        locked(&self.entries).insert(
            request.request_id,
            StatusEntry {
                state: RequestState::Pending,
                result: None,
                error: None,
                enqueued_at: request.enqueued_at,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn mark_retry(&self, request: &CouponRequest) -> Result<(), Error> {
        self.upsert(request.request_id, |entry| {
            entry.state = RequestState::Retry;
        });
        Ok(())
    }

    async fn complete(&self, request_id: RequestId, view: &UserCouponView) -> Result<(), Error> {
        self.upsert(request_id, |entry| {
            entry.state = RequestState::Completed;
            entry.result = Some(view.clone());
        });
        Ok(())
    }

    async fn fail(&self, request_id: RequestId, reason: &str) -> Result<(), Error> {
        self.upsert(request_id, |entry| {
            entry.state = RequestState::Failed;
            entry.error = Some(reason.to_string());
        });
        Ok(())
    }

    async fn get(&self, request_id: RequestId) -> Result<AsyncStatus, Error> {
        let entries = locked(&self.entries);
        let Some(entry) = entries.get(&request_id) else {
            return Ok(AsyncStatus::not_found(request_id));
        };
        let until = if entry.state.is_terminal() { entry.updated_at } else { Utc::now() };
        let waiting_ms =
            u64::try_from((until - entry.enqueued_at).num_milliseconds()).unwrap_or(0);
        Ok(AsyncStatus {
            request_id,
            state: entry.state,
            result: entry.result.clone(),
            error: entry.error.clone(),
            waiting_ms,
        })
    }
}

// ============================================================================
// Compensation log, dead letters, alerts
// ============================================================================

/// Recording [`CompensationLog`].
#[derive(Default)]
pub struct InMemoryCompensationLog {
    rows: Mutex<Vec<CompensationFailure>>,
    next_id: AtomicI64,
}

impl InMemoryCompensationLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded failure, in order.
    #[must_use]
    pub fn entries(&self) -> Vec<CompensationFailure> {
        locked(&self.rows).clone()
    }
}

#[async_trait]
impl CompensationLog for InMemoryCompensationLog {
    async fn record(&self, failure: &CompensationFailure) -> Result<i64, Error> {
        locked(&self.rows).push(failure.clone());
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

/// Recording [`DeadLetterSink`].
#[derive(Default)]
pub struct InMemoryDeadLetters {
    rows: Mutex<Vec<(CouponRequest, String)>>,
    next_id: AtomicI64,
}

impl InMemoryDeadLetters {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every dead letter with the error that killed it.
    #[must_use]
    pub fn entries(&self) -> Vec<(CouponRequest, String)> {
        locked(&self.rows).clone()
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetters {
    async fn push(&self, request: &CouponRequest, error: &str) -> Result<i64, Error> {
        locked(&self.rows).push((request.clone(), error.to_string()));
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

/// One captured critical alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CriticalAlert {
    /// Order under compensation, if known.
    pub order_id: Option<OrderId>,
    /// Step whose compensation failed.
    pub step_name: String,
    /// Alert message.
    pub message: String,
}

/// Recording [`AlertSink`].
#[derive(Default)]
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<CriticalAlert>>,
}

impl RecordingAlertSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every alert raised so far.
    #[must_use]
    pub fn alerts(&self) -> Vec<CriticalAlert> {
        locked(&self.alerts).clone()
    }
}

#[async_trait]
impl AlertSink for RecordingAlertSink {
    async fn notify_critical(&self, order_id: Option<OrderId>, step_name: &str, message: &str) {
        locked(&self.alerts).push(CriticalAlert {
            order_id,
            step_name: step_name.to_string(),
            message: message.to_string(),
        });
    }
}

// ============================================================================
// Stub issuer
// ============================================================================

/// Scriptable [`CouponIssuer`] mirroring the real service's behaviour:
/// a quantity cap, `(user, coupon)` uniqueness and injectable transient
/// failures.
pub struct StubIssuer {
    remaining: AtomicI64,
    issued: Mutex<HashSet<(i64, i64)>>,
    transient_failures: AtomicU32,
    next_grant_id: AtomicI64,
}

impl StubIssuer {
    /// Create a stub with `remaining` issuable units.
    #[must_use]
    pub fn new(remaining: i64) -> Self {
        Self {
            remaining: AtomicI64::new(remaining),
            issued: Mutex::new(HashSet::new()),
            transient_failures: AtomicU32::new(0),
            next_grant_id: AtomicI64::new(0),
        }
    }

    /// Make the next `n` issue calls fail with a transient database error.
    pub fn fail_next(&self, n: u32) {
        self.transient_failures.store(n, Ordering::SeqCst);
    }

    /// How many units have been issued.
    #[must_use]
    pub fn issued_count(&self) -> usize {
        locked(&self.issued).len()
    }
}

#[async_trait]
impl CouponIssuer for StubIssuer {
    async fn issue(&self, user_id: UserId, coupon_id: CouponId) -> Result<UserCouponView, Error> {
        if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::Database("injected transient failure".to_string()));
        }

        let mut issued = locked(&self.issued);
        if issued.contains(&(user_id.get(), coupon_id.get())) {
            return Err(Error::CouponAlreadyIssued { user_id, coupon_id });
        }
        if self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n > 0).then_some(n - 1)
            })
            .is_err()
        {
            return Err(Error::CouponExhausted(coupon_id));
        }
        issued.insert((user_id.get(), coupon_id.get()));

        Ok(UserCouponView {
            user_coupon_id: UserCouponId::new(self.next_grant_id.fetch_add(1, Ordering::SeqCst) + 1),
            user_id,
            coupon_id,
            status: UserCouponStatus::Unused,
            issued_at: Utc::now(),
        })
    }
}
