//! Policy for compensation failures: record always, alert and halt only
//! when the failure is critical.
//!
//! A failure is critical when it leaves a durable inconsistency the system
//! cannot self-heal — a row that should exist is gone, or the error is
//! something no retry semantics cover. Ordinary stale versions and lock
//! timeouts are recorded for manual replay and the remaining compensations
//! keep running.

use std::sync::Arc;

use orderflow_core::alert::AlertSink;
use orderflow_core::compensation::{CompensationFailure, CompensationLog};
use orderflow_core::error::{Error, ErrorKind};

/// Applies the critical-vs-best-effort policy to one compensation failure.
pub struct FailureCompensationHandler {
    log: Arc<dyn CompensationLog>,
    alerts: Arc<dyn AlertSink>,
}

impl FailureCompensationHandler {
    /// Create the handler.
    #[must_use]
    pub fn new(log: Arc<dyn CompensationLog>, alerts: Arc<dyn AlertSink>) -> Self {
        Self { log, alerts }
    }

    /// Whether an error from a `compensate` leaves a durable inconsistency.
    ///
    /// Missing rows mean the forward effect can no longer be located;
    /// uncategorized errors get no benefit of the doubt. Conflicts, lock
    /// timeouts and other transients are replayable from the failure record.
    #[must_use]
    pub const fn is_critical(error: &Error) -> bool {
        matches!(
            error.kind(),
            ErrorKind::Critical | ErrorKind::NotFound | ErrorKind::Internal
        )
    }

    /// Handle one failure: alert if critical, record always, and return the
    /// halting [`Error::CompensationFailed`] for critical cases.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CompensationFailed`] when the failure is critical;
    /// the orchestrator stops compensating and propagates it.
    pub async fn handle(&self, failure: CompensationFailure) -> Result<(), Error> {
        let critical = Self::is_critical(&failure.error);

        if critical {
            self.alerts
                .notify_critical(failure.order_id, failure.step_name, &failure.error.to_string())
                .await;
        }

        if let Err(e) = self.log.record(&failure).await {
            // The record is itself best-effort; losing it must not stop the
            // alert/halt decision from standing.
            tracing::error!(
                step_name = failure.step_name,
                error = %e,
                "Failed to record compensation failure"
            );
        }

        if critical {
            metrics::counter!("saga.compensation_failed").increment(1);
            Err(Error::CompensationFailed {
                step: failure.step_name,
                order_id: failure.order_id,
                reason: failure.error.to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code
mod tests {
    use super::*;
    use orderflow_core::types::{CouponId, OrderId, UserId};

    #[test]
    fn missing_rows_and_internal_errors_are_critical() {
        assert!(FailureCompensationHandler::is_critical(&Error::UserNotFound(UserId::new(1))));
        assert!(FailureCompensationHandler::is_critical(&Error::Internal("forced".into())));
        assert!(FailureCompensationHandler::is_critical(&Error::CompensationFailed {
            step: "DeductBalanceStep",
            order_id: Some(OrderId::new(5001)),
            reason: "x".into(),
        }));
    }

    #[test]
    fn stale_versions_and_lock_timeouts_are_not_critical() {
        assert!(!FailureCompensationHandler::is_critical(&Error::VersionConflict {
            entity: "users",
            id: 1,
        }));
        assert!(!FailureCompensationHandler::is_critical(&Error::LockTimeout {
            key: "user:balance:1".into(),
        }));
        assert!(!FailureCompensationHandler::is_critical(&Error::CouponExhausted(
            CouponId::new(9)
        )));
    }
}
