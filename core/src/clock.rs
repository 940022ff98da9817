//! Testable time.

use chrono::{DateTime, Utc};

/// Source of the current time. Production code uses [`SystemClock`]; tests
/// substitute a fixed clock so timestamps are deterministic.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
