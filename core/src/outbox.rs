//! Dispatcher-facing outbox seam.
//!
//! Row *insertion* is not part of this trait — it happens inside the saga's
//! final database transaction through the Postgres store directly, so the
//! business rows and the message commit or roll back together. What the
//! dispatcher needs is the claim/mark state machine, which an in-memory
//! implementation can also provide for tests.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Notify;

use crate::error::Error;
use crate::types::{MessageId, OutboxMessage};

/// Cloneable wakeup handle for the outbox dispatcher — the explicit
/// replacement for a framework's after-commit listener. Writers of outbox
/// rows call [`DispatcherHandle::wake`] right after their transaction
/// commits; `wake` is non-blocking and never fails.
#[derive(Clone, Default)]
pub struct DispatcherHandle {
    notify: Arc<Notify>,
}

impl DispatcherHandle {
    /// Create a fresh handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Nudge the dispatcher to drain now.
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    /// Wait for the next nudge. Only the dispatcher task calls this.
    pub async fn nudged(&self) {
        self.notify.notified().await;
    }
}

/// The outbox state machine as seen by the dispatcher.
#[async_trait]
pub trait Outbox: Send + Sync {
    /// Atomically transition up to `batch` PENDING rows to PUBLISHING and
    /// return them, oldest first. Two dispatchers never claim the same row.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] on store failure.
    async fn claim_pending(&self, batch: usize) -> Result<Vec<OutboxMessage>, Error>;

    /// Mark a claimed row PUBLISHED with `sent_at = now`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] on store failure.
    async fn mark_published(&self, id: MessageId) -> Result<(), Error>;

    /// Return a claimed row to PENDING with `retry_count` bumped, after a
    /// transient publish failure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] on store failure.
    async fn release_for_retry(&self, id: MessageId) -> Result<(), Error>;

    /// Mark a claimed row ABANDONED once the retry budget is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] on store failure.
    async fn mark_abandoned(&self, id: MessageId) -> Result<(), Error>;

    /// Mark a claimed row FAILED after a non-retryable publish error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] on store failure.
    async fn mark_failed(&self, id: MessageId) -> Result<(), Error>;
}
