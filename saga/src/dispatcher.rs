//! Outbox dispatcher: the single background task that drains PENDING outbox
//! rows to the event log.
//!
//! The dispatcher sleeps on a `select!` over its wakeup handle, a poll timer
//! and the shutdown signal. `CreateOrderStep` (and coupon issuance) nudge the
//! handle right after their transactions commit — the explicit replacement
//! for a framework's after-commit listener — so the common case publishes
//! within milliseconds while the timer covers rows left behind by crashes.
//!
//! Publish failures never propagate: the row is re-marked per the outbox
//! state machine and the loop moves on.

use std::sync::Arc;
use tokio::sync::watch;

use orderflow_core::config::OutboxConfig;
use orderflow_core::error::{Error, ErrorKind};
use orderflow_core::event_log::EventLog;
use orderflow_core::outbox::Outbox;
use orderflow_core::types::OutboxMessage;

pub use orderflow_core::outbox::DispatcherHandle;

/// The outbox dispatcher task.
pub struct OutboxDispatcher {
    outbox: Arc<dyn Outbox>,
    event_log: Arc<dyn EventLog>,
    config: OutboxConfig,
    handle: DispatcherHandle,
    shutdown: watch::Receiver<bool>,
}

impl OutboxDispatcher {
    /// Create a dispatcher. Hand `handle` clones to whoever needs to nudge it.
    #[must_use]
    pub fn new(
        outbox: Arc<dyn Outbox>,
        event_log: Arc<dyn EventLog>,
        config: OutboxConfig,
        handle: DispatcherHandle,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self { outbox, event_log, config, handle, shutdown }
    }

    /// Run until shutdown. Finishes the in-flight batch before exiting.
    pub async fn run(mut self) {
        tracing::info!(
            poll_interval_ms = self.config.poll_interval_ms,
            batch_size = self.config.batch_size,
            "Outbox dispatcher started"
        );

        loop {
            tokio::select! {
                () = self.handle.nudged() => {}
                () = tokio::time::sleep(self.config.poll_interval()) => {}
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            self.drain().await;

            if *self.shutdown.borrow() {
                break;
            }
        }

        tracing::info!("Outbox dispatcher stopped");
    }

    /// Claim and publish batches until the outbox runs dry.
    pub async fn drain(&self) {
        loop {
            let batch = match self.outbox.claim_pending(self.config.batch_size).await {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::error!(error = %e, "Outbox claim failed; retrying next tick");
                    return;
                }
            };
            if batch.is_empty() {
                return;
            }

            let exhausted = batch.len() < self.config.batch_size;
            for message in batch {
                self.dispatch_one(&message).await;
            }
            if exhausted {
                return;
            }
        }
    }

    async fn dispatch_one(&self, message: &OutboxMessage) {
        let topic = message.message_type.topic();
        let key = message.partition_key();

        let payload = match serde_json::to_vec(&message.payload) {
            Ok(payload) => payload,
            Err(e) => {
                // Unencodable payloads can never succeed; park the row.
                tracing::error!(message_id = message.message_id.get(), error = %e, "Payload encode failed");
                self.finish(self.outbox.mark_failed(message.message_id).await);
                return;
            }
        };

        match self.event_log.publish(topic, &key, &payload).await {
            Ok(()) => {
                self.finish(self.outbox.mark_published(message.message_id).await);
            }
            Err(e) if e.kind() == ErrorKind::Transient => {
                #[allow(clippy::cast_possible_wrap)]
                let budget = self.config.max_retries as i32;
                if message.retry_count + 1 >= budget {
                    tracing::warn!(
                        message_id = message.message_id.get(),
                        retry_count = message.retry_count,
                        error = %e,
                        "Publish failed; retry budget exhausted"
                    );
                    self.finish(self.outbox.mark_abandoned(message.message_id).await);
                } else {
                    tracing::warn!(
                        message_id = message.message_id.get(),
                        retry_count = message.retry_count,
                        error = %e,
                        "Publish failed; will retry"
                    );
                    self.finish(self.outbox.release_for_retry(message.message_id).await);
                }
            }
            Err(e) => {
                tracing::error!(
                    message_id = message.message_id.get(),
                    error = %e,
                    "Non-retryable publish error"
                );
                self.finish(self.outbox.mark_failed(message.message_id).await);
            }
        }
    }

    /// Store errors while re-marking are logged, never propagated; the row
    /// stays claimed and a later claim cycle or operator picks it up.
    fn finish(&self, result: Result<(), Error>) {
        if let Err(e) = result {
            tracing::error!(error = %e, "Outbox state transition failed");
        }
    }
}
