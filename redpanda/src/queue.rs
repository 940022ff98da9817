//! Partitioned coupon request log over a Kafka-compatible topic.
//!
//! The producer pins each request to `coupon_id % partitions`, so all
//! contention for one coupon serializes into one partition while different
//! coupons spread across the topic. One pre-assigned consumer per partition
//! feeds exactly one worker; offsets are stored on poll and committed only
//! after the worker writes the request's terminal status, giving
//! at-least-once delivery into an idempotent issuance routine.

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::time::Duration;

use orderflow_core::config::RedpandaConfig;
use orderflow_core::error::Error;
use orderflow_core::queue::CouponQueue;
use orderflow_core::types::CouponRequest;

/// Redpanda-backed [`CouponQueue`].
pub struct RedpandaCouponQueue {
    topic: String,
    partitions: u32,
    producer: FutureProducer,
    /// One consumer per partition, index = partition number.
    consumers: Vec<StreamConsumer>,
}

impl RedpandaCouponQueue {
    /// Connect the producer and one pre-assigned consumer per partition.
    ///
    /// The topic must already exist with at least `partitions` partitions;
    /// partition assignment is manual so each worker owns exactly one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Publish`] if a client cannot be created or assigned.
    pub fn new(config: &RedpandaConfig, partitions: u32) -> Result<Self, Error> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("acks", "all")
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| queue_err(&config.coupon_topic, &e))?;

        let mut consumers = Vec::with_capacity(partitions as usize);
        for partition in 0..partitions {
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &config.brokers)
                .set("group.id", &config.consumer_group)
                .set("enable.auto.commit", "false")
                .set("enable.auto.offset.store", "false")
                .set("auto.offset.reset", "earliest")
                .create()
                .map_err(|e| queue_err(&config.coupon_topic, &e))?;

            let mut assignment = TopicPartitionList::new();
            #[allow(clippy::cast_possible_wrap)]
            assignment
                .add_partition_offset(&config.coupon_topic, partition as i32, Offset::Stored)
                .map_err(|e| queue_err(&config.coupon_topic, &e))?;
            consumer
                .assign(&assignment)
                .map_err(|e| queue_err(&config.coupon_topic, &e))?;

            consumers.push(consumer);
        }

        Ok(Self {
            topic: config.coupon_topic.clone(),
            partitions,
            producer,
            consumers,
        })
    }

    fn consumer(&self, partition: u32) -> Result<&StreamConsumer, Error> {
        self.consumers
            .get(partition as usize)
            .ok_or_else(|| Error::Internal(format!("no consumer for partition {partition}")))
    }
}

fn queue_err(topic: &str, e: &KafkaError) -> Error {
    Error::Publish {
        topic: topic.to_string(),
        reason: e.to_string(),
    }
}

#[async_trait]
impl CouponQueue for RedpandaCouponQueue {
    fn partitions(&self) -> u32 {
        self.partitions
    }

    async fn append(&self, request: &CouponRequest, deadline: Duration) -> Result<(), Error> {
        let partition = self.partition_for(request.coupon_id);
        let key = request.coupon_id.to_string();
        let payload = serde_json::to_vec(request)
            .map_err(|e| Error::Internal(format!("request encode failed: {e}")))?;

        #[allow(clippy::cast_possible_wrap)]
        let record = FutureRecord::to(&self.topic)
            .key(&key)
            .partition(partition as i32)
            .payload(&payload);

        self.producer
            .send(record, Timeout::After(deadline))
            .await
            .map_err(|(e, _msg)| match e {
                KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull) => {
                    Error::QueueFull { partition }
                }
                other => queue_err(&self.topic, &other),
            })?;

        tracing::debug!(
            request_id = %request.request_id,
            coupon_id = request.coupon_id.get(),
            partition = partition,
            "Coupon request appended"
        );
        Ok(())
    }

    async fn poll(
        &self,
        partition: u32,
        timeout: Duration,
    ) -> Result<Option<CouponRequest>, Error> {
        let consumer = self.consumer(partition)?;

        let message = match tokio::time::timeout(timeout, consumer.recv()).await {
            Err(_elapsed) => return Ok(None),
            Ok(Err(e)) => return Err(queue_err(&self.topic, &e)),
            Ok(Ok(message)) => message,
        };

        let payload = message.payload().unwrap_or_default();
        let request: CouponRequest = serde_json::from_slice(payload)
            .map_err(|e| Error::Internal(format!("request decode failed: {e}")))?;

        consumer
            .store_offset_from_message(&message)
            .map_err(|e| queue_err(&self.topic, &e))?;

        Ok(Some(request))
    }

    async fn commit(&self, partition: u32) -> Result<(), Error> {
        use rdkafka::consumer::CommitMode;
        self.consumer(partition)?
            .commit_consumer_state(CommitMode::Async)
            .map_err(|e| queue_err(&self.topic, &e))
    }
}
