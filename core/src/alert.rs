//! Fire-and-forget alerting for critical compensation failures.

use async_trait::async_trait;

use crate::types::OrderId;

/// Notifier for failures that need a human. Implementations must not fail the
/// caller: alerting problems are logged, never propagated.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Raise a critical alert for a compensation failure.
    async fn notify_critical(&self, order_id: Option<OrderId>, step_name: &str, message: &str);
}

/// Alert sink that writes a structured error event. The default production
/// sink; operators route it through their log pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn notify_critical(&self, order_id: Option<OrderId>, step_name: &str, message: &str) {
        tracing::error!(
            order_id = order_id.map(|id| id.get()),
            step_name = step_name,
            message = message,
            "CRITICAL compensation failure"
        );
    }
}
