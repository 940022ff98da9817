//! The partition workers.
//!
//! One worker task per partition, each single-threaded with respect to its
//! partition so requests for one coupon process in strict enqueue order.
//! Business failures are terminal on the first attempt; transient failures
//! re-append to the same partition tail with a bumped retry count until the
//! budget runs out, then the request is durably dead-lettered. The consumer
//! offset commits only after the terminal status write, so a crash replays
//! the request into an idempotent issuance routine.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use orderflow_core::config::CouponConfig;
use orderflow_core::error::{Error, ErrorKind};
use orderflow_core::pipeline::{CouponIssuer, DeadLetterSink};
use orderflow_core::queue::CouponQueue;
use orderflow_core::retry::RetryPolicy;
use orderflow_core::status::StatusStore;
use orderflow_core::types::CouponRequest;

/// Spawns and runs one worker per queue partition.
#[derive(Clone)]
pub struct CouponWorkerPool {
    queue: Arc<dyn CouponQueue>,
    issuer: Arc<dyn CouponIssuer>,
    status: Arc<dyn StatusStore>,
    dead_letters: Arc<dyn DeadLetterSink>,
    config: CouponConfig,
    retry: RetryPolicy,
    shutdown: watch::Receiver<bool>,
}

impl CouponWorkerPool {
    /// Create the pool. `shutdown` flipping to `true` drains each worker's
    /// in-flight request to its commit boundary and stops the loop.
    #[must_use]
    pub fn new(
        queue: Arc<dyn CouponQueue>,
        issuer: Arc<dyn CouponIssuer>,
        status: Arc<dyn StatusStore>,
        dead_letters: Arc<dyn DeadLetterSink>,
        config: CouponConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let retry = RetryPolicy::with_max_retries(config.max_retries);
        Self { queue, issuer, status, dead_letters, config, retry, shutdown }
    }

    /// Spawn one task per partition and return their handles.
    #[must_use]
    pub fn spawn(&self) -> Vec<JoinHandle<()>> {
        (0..self.queue.partitions())
            .map(|partition| {
                let worker = self.clone();
                tokio::spawn(async move { worker.run_partition(partition).await })
            })
            .collect()
    }

    async fn run_partition(mut self, partition: u32) {
        tracing::info!(partition = partition, "Coupon worker started");

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let polled = tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                polled = self.queue.poll(partition, self.config.poll_timeout()) => polled,
            };

            match polled {
                Ok(None) => {}
                Ok(Some(request)) => {
                    self.process(partition, request).await;
                    if let Err(e) = self.queue.commit(partition).await {
                        tracing::error!(partition = partition, error = %e, "Offset commit failed");
                    }
                }
                Err(e) => {
                    tracing::error!(partition = partition, error = %e, "Queue poll failed");
                    tokio::time::sleep(self.config.poll_timeout()).await;
                }
            }
        }

        tracing::info!(partition = partition, "Coupon worker stopped");
    }

    async fn process(&self, partition: u32, request: CouponRequest) {
        // At-least-once delivery: a replayed request whose outcome is already
        // recorded must not overwrite its terminal status.
        if let Ok(existing) = self.status.get(request.request_id).await {
            if existing.state.is_terminal() {
                tracing::debug!(
                    request_id = %request.request_id,
                    "Redelivered request already terminal; skipping"
                );
                return;
            }
        }

        let outcome = tokio::time::timeout(
            self.config.worker_deadline(),
            self.issuer.issue(request.user_id, request.coupon_id),
        )
        .await
        .unwrap_or(Err(Error::Deadline(self.config.worker_deadline_ms)));

        match outcome {
            Ok(view) => {
                self.write_status(
                    self.status.complete(request.request_id, &view).await,
                    &request,
                );
            }
            Err(e) if matches!(e.kind(), ErrorKind::Business | ErrorKind::NotFound) => {
                metrics::counter!("coupon.rejected").increment(1);
                tracing::debug!(
                    request_id = %request.request_id,
                    coupon_id = request.coupon_id.get(),
                    reason = %e,
                    "Issuance rejected"
                );
                self.write_status(
                    self.status.fail(request.request_id, &e.to_string()).await,
                    &request,
                );
            }
            Err(e) => self.retry_or_bury(partition, request, &e).await,
        }
    }

    async fn retry_or_bury(&self, partition: u32, request: CouponRequest, cause: &Error) {
        let mut retried = request;
        retried.retry_count += 1;

        if retried.retry_count < self.config.max_retries {
            tracing::warn!(
                request_id = %retried.request_id,
                partition = partition,
                retry_count = retried.retry_count,
                error = %cause,
                "Transient issuance failure; re-appending"
            );
            self.write_status(self.status.mark_retry(&retried).await, &retried);
            tokio::time::sleep(self.retry.delay_for_attempt(retried.retry_count - 1)).await;

            if let Err(e) = self
                .queue
                .append(&retried, self.config.enqueue_timeout())
                .await
            {
                tracing::error!(request_id = %retried.request_id, error = %e, "Re-append failed");
                self.bury(&retried, &e).await;
            }
        } else {
            self.bury(&retried, cause).await;
        }
    }

    async fn bury(&self, request: &CouponRequest, cause: &Error) {
        if let Err(e) = self.dead_letters.push(request, &cause.to_string()).await {
            tracing::error!(request_id = %request.request_id, error = %e, "Dead letter write failed");
        }
        self.write_status(
            self.status.fail(request.request_id, "exhausted retries").await,
            request,
        );
    }

    fn write_status(&self, result: Result<(), Error>, request: &CouponRequest) {
        if let Err(e) = result {
            tracing::error!(request_id = %request.request_id, error = %e, "Status write failed");
        }
    }
}
