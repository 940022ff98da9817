//! Redpanda backends for the Orderflow transactional core.
//!
//! Two concerns live here, both speaking the Kafka protocol through rdkafka
//! (so Redpanda, Apache Kafka or any compatible broker works):
//!
//! - [`RedpandaEventLog`] — the producer the outbox dispatcher publishes
//!   through, keyed by order id for per-order ordering
//! - [`RedpandaCouponQueue`] — the partitioned coupon request log, keyed by
//!   coupon id so one coupon's requests serialize into one partition
//!
//! # Delivery semantics
//!
//! At-least-once on both paths. The dispatcher marks outbox rows only after
//! the broker acknowledges; the coupon workers commit offsets only after the
//! request's terminal status is written. Consumers downstream dedupe on
//! `(order_id, event_type)`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod queue;

pub use queue::RedpandaCouponQueue;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;

use orderflow_core::error::Error;
use orderflow_core::event_log::EventLog;

/// Redpanda-backed [`EventLog`].
///
/// # Example
///
/// ```no_run
/// use orderflow_redpanda::RedpandaEventLog;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let log = RedpandaEventLog::builder()
///     .brokers("localhost:9092")
///     .acks("all")
///     .compression("lz4")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaEventLog {
    producer: FutureProducer,
    timeout: Duration,
}

impl RedpandaEventLog {
    /// Create an event log with default producer settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Publish`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, Error> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a builder for custom producer settings.
    #[must_use]
    pub fn builder() -> RedpandaEventLogBuilder {
        RedpandaEventLogBuilder::default()
    }
}

/// Builder for [`RedpandaEventLog`].
#[derive(Default)]
pub struct RedpandaEventLogBuilder {
    brokers: Option<String>,
    acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
}

impl RedpandaEventLogBuilder {
    /// Comma-separated broker addresses.
    #[must_use]
    pub fn brokers(mut self, brokers: &str) -> Self {
        self.brokers = Some(brokers.to_string());
        self
    }

    /// Producer acks setting (default `all`).
    #[must_use]
    pub fn acks(mut self, acks: &str) -> Self {
        self.acks = Some(acks.to_string());
        self
    }

    /// Compression codec (default none).
    #[must_use]
    pub fn compression(mut self, compression: &str) -> Self {
        self.compression = Some(compression.to_string());
        self
    }

    /// Per-publish delivery timeout (default 5 s).
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the event log.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Publish`] if the producer cannot be created or no
    /// brokers were configured.
    pub fn build(self) -> Result<RedpandaEventLog, Error> {
        let brokers = self.brokers.ok_or_else(|| Error::Publish {
            topic: String::new(),
            reason: "no brokers configured".to_string(),
        })?;

        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &brokers)
            .set("acks", self.acks.as_deref().unwrap_or("all"))
            .set("message.timeout.ms", "5000");
        if let Some(compression) = &self.compression {
            config.set("compression.type", compression);
        }

        let producer: FutureProducer = config.create().map_err(|e| Error::Publish {
            topic: String::new(),
            reason: format!("producer creation failed: {e}"),
        })?;

        Ok(RedpandaEventLog {
            producer,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
        })
    }
}

#[async_trait]
impl EventLog for RedpandaEventLog {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), Error> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        self.producer
            .send(record, Timeout::After(self.timeout))
            .await
            .map_err(|(e, _msg)| Error::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

        tracing::debug!(topic = topic, key = key, "Event published");
        Ok(())
    }
}
